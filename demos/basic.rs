use tracing_subscriber::EnvFilter;
use wbs_store::bootstrap::ensure_exists;
use wbs_store::{DocumentStore, Error, StoreConfig, User};

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("wbs_store=info")),
        )
        .init();

    let path = std::env::temp_dir().join("wbs_store_example_basic.json");
    let _ = std::fs::remove_file(&path);
    let store = DocumentStore::new(StoreConfig::new(&path));

    // first access creates the default document
    let doc = ensure_exists(&store)?;
    println!("bootstrapped version = {}", doc.meta.version);
    println!("users = {:?}", doc.users.iter().map(|u| &u.name).collect::<Vec<_>>());

    // two editors read the same version
    let base = doc.meta.version.clone();
    let mut alice = doc.clone();
    let mut bob = doc;

    alice.users.push(User {
        id: "u2".into(),
        name: "Alice".into(),
        role: Default::default(),
    });
    let v2 = store.write(alice, Some(base.as_str()))?;
    println!("alice saved, version = {v2}");

    // bob's edit was based on a version that no longer exists
    bob.tasks.clear();
    match store.write(bob, Some(base.as_str())) {
        Err(e @ Error::Conflict { .. }) => {
            println!("bob: {e}");
            println!("bob: {}", e.recovery().hint());
        }
        other => println!("unexpected: {other:?}"),
    }

    // reload, redo, resubmit
    let mut fresh = store.load()?.ok_or(Error::NotFound)?;
    fresh.tasks.clear();
    let v3 = store.write(fresh, Some(v2.as_str()))?;
    println!("bob saved after reload, version = {v3}");

    let _ = std::fs::remove_file(&path);
    Ok(())
}
