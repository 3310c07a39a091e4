use std::sync::mpsc;

use pgconv::{
    IoMode, Result, SerializerOptions, SingleThreadContext,
    io::run_sync,
    transport::MemoryTransport,
};

pub fn main(options: &SerializerOptions) -> Result<()> {
    let info = options.type_info::<Vec<i64>>(None)?;
    let values = vec![4, 2, 0];
    let res = info.resolve(&values, None)?;

    let io = MemoryTransport::sink();
    let sink = io.output();
    let mut w = options.writer(io);
    run_sync(w.write_value(IoMode::Blocking, &*res.converter, &values))?;
    run_sync(w.send(IoMode::Blocking))?;
    tracing::info!(len = sink.len(), pg_type_id = ?res.pg_type_id, "written blocking");

    // read the same bytes back on a dedicated thread, suspending in between
    let context = SingleThreadContext::new("pgconv-example");
    let mut r = options.reader(MemoryTransport::new(sink.take()).chunks([3]).pending(true));
    let converter = res.converter.clone();
    let (tx, rx) = mpsc::channel();

    context.spawn(async move {
        let value = r.read_value(IoMode::Async, &*converter).await;
        tx.send(value).ok();
    })?;

    let read = rx.recv().map_err(|_| std::io::Error::other("worker exited"))??;
    tracing::info!(?read, "read on {}", context.name());
    assert_eq!(read, Some(values));

    Ok(())
}
