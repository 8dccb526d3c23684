use memarena::{ArenaError, PoolRegistry, StdoutSink};

fn main() -> Result<(), ArenaError> {
    let mut registry = PoolRegistry::new();
    let id = registry.create(1024)?;
    let arena = registry.arena_mut(id)?;

    arena.write_string("user", "ada")?;
    arena.write_int("visits", 3i32)?;
    arena.write_bytes("token", &[0xde, 0xad, 0xbe, 0xef])?;

    println!("user: {}", arena.read_string("user")?);
    println!("visits: {}", arena.read_int::<i32>("visits")?);
    println!("token: {:02x?}", arena.read_bytes("token")?);

    let scratch = arena.allocate(200, "scratch")?;
    println!("Requested 200 bytes, got {} at offset {}", scratch.size, scratch.offset);
    arena.describe().write_to(&mut StdoutSink);

    arena.free(scratch.handle)?;
    match arena.free(scratch.handle) {
        Err(ArenaError::AlreadyFree(_)) => println!("second free correctly refused"),
        other => println!("unexpected: {other:?}"),
    }

    // Merge example
    let again = arena.allocate(200, "again")?;
    if again.offset == scratch.offset {
        println!("Correctly reused offset {}", again.offset);
    } else {
        println!("Not reused. scratch was at {} and again is at {}", scratch.offset, again.offset);
    }

    arena.describe().write_to(&mut StdoutSink);

    for err in registry.clear_all() {
        eprintln!("teardown failed: {err}");
    }
    Ok(())
}
