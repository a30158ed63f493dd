use std::time::Duration;
use wbs_store::bootstrap::ensure_exists;
use wbs_store::{DocumentStore, Error, RetryPolicy, Session, StoreConfig};

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt().init();

    let path = std::env::temp_dir().join("wbs_store_example_session.json");
    let _ = std::fs::remove_file(&path);
    let store = DocumentStore::new(
        StoreConfig::new(&path)
            .lock_timeout(Duration::from_secs(2))
            .pretty(false),
    );
    ensure_exists(&store)?;

    let mut session = Session::new(&store).with_retry(RetryPolicy {
        max_attempts: 5,
        delay: Duration::from_millis(200),
    });

    let mut doc = session.load()?.ok_or(Error::NotFound)?;
    println!("loaded version   = {:?}", session.version());

    if let Some(task) = doc.tasks.first_mut() {
        task["progress"] = 50.into();
    }
    session.commit(doc)?;
    println!("committed version = {:?}", session.version());

    // someone else writes in between
    let mut other = store.load()?.ok_or(Error::NotFound)?;
    other.meta.updated_by = Some("another-process".into());
    store.write(other, None)?;

    let stale = store.load()?.ok_or(Error::NotFound)?;
    match session.commit(stale) {
        Err(e) => println!("commit refused: {e} ({})", e.recovery().hint()),
        Ok(v) => println!("unexpected success: {v}"),
    }

    // modify reads and writes under one lock
    let task_count = session.modify(|doc| {
        doc.meta.updated_by = Some("session-demo".into());
        Ok(doc.tasks.len())
    });
    println!("modify after conflict: {task_count:?}");

    session.load()?;
    let task_count = session.modify(|doc| Ok(doc.tasks.len()))?;
    println!("tasks = {task_count}, version = {:?}", session.version());

    let _ = std::fs::remove_file(&path);
    Ok(())
}
