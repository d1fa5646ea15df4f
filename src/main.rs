use allocator_api2::alloc::Allocator;
use slotpool::{BareVector, CheckedAllocator, FixedPool, MapPool, PoolError, SortedMap};
use std::{
    error::Error,
    io::{self, Write},
};
use tracing_subscriber::EnvFilter;

const ELEMENTS: i32 = 10;

/// Slots wide enough for every buffer a `BareVector<i32>` needs to hold `ELEMENTS` values.
type VectorPool = FixedPool<[i32; 16], 4>;

fn factorial(n: i32) -> i32 {
    (1..=n).product()
}

fn fill_map<A: CheckedAllocator>(map: &mut SortedMap<i32, i32, A>) -> Result<(), PoolError> {
    for key in 0..ELEMENTS {
        map.insert(key, factorial(key))?;
    }
    Ok(())
}

fn fill_vector<A: CheckedAllocator>(vector: &mut BareVector<i32, A>) -> Result<(), PoolError> {
    for n in 0..ELEMENTS {
        vector.push(factorial(n))?;
    }
    Ok(())
}

fn print_map<A: Allocator>(
    out: &mut impl Write,
    title: &str,
    map: &SortedMap<i32, i32, A>,
) -> io::Result<()> {
    writeln!(out, "{title}:")?;
    for (key, value) in map {
        writeln!(out, "\t{key} {value}")?;
    }
    writeln!(out)
}

fn print_vector<A: Allocator>(
    out: &mut impl Write,
    title: &str,
    vector: &BareVector<i32, A>,
) -> io::Result<()> {
    writeln!(out, "{title}:")?;
    for value in vector {
        writeln!(out, "\t{value}")?;
    }
    writeln!(out)
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let mut out = io::stdout().lock();

    let mut default_map = SortedMap::new();
    fill_map(&mut default_map)?;
    print_map(&mut out, "default map", &default_map)?;

    let pool = MapPool::<i32, i32, { ELEMENTS as usize }>::new();
    let mut pool_map = SortedMap::new_in(pool.clone());
    fill_map(&mut pool_map)?;
    tracing::debug!(free = pool.free_slots(), "pool map filled");
    print_map(&mut out, "pool map", &pool_map)?;

    let mut default_vector = BareVector::new();
    fill_vector(&mut default_vector)?;
    print_vector(&mut out, "default vector", &default_vector)?;

    let mut pool_vector = BareVector::new_in(VectorPool::new());
    fill_vector(&mut pool_vector)?;
    print_vector(&mut out, "pool vector", &pool_vector)?;

    Ok(())
}
