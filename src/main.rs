use futures::{channel::mpsc, executor::block_on, SinkExt, StreamExt};
use futures_fanout::prelude::*;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let (mut source, source_rx) = mpsc::channel::<i32>(0);
    let broadcaster = Broadcaster::<i32>::create(source_rx)?;

    let (a, a_rx) = mpsc::unbounded::<i32>();
    let (b, b_rx) = mpsc::unbounded::<i32>();
    let (c, c_rx) = mpsc::unbounded::<i32>();
    let (d, _d_rx) = mpsc::unbounded::<i32>();
    let (wrong, _wrong_rx) = mpsc::unbounded::<String>();

    broadcaster.subscribe(&a)?;
    broadcaster.subscribe(&b)?;

    if let Err(error) = broadcaster.subscribe(&wrong) {
        println!("subscribe(String sink): {error}");
    }

    push(&mut source, 5);

    broadcaster.subscribe(&c)?;
    broadcaster.unsubscribe(&b)?;

    push(&mut source, 42);
    push(&mut source, 6);

    println!("subscribers: {}", broadcaster.subscriber_count()?);

    drop(source);
    broadcaster.wait();

    if let Err(error) = broadcaster.subscribe(&d) {
        println!("subscribe(D): {error}");
    }

    drop((a, b, c));

    for (name, rx) in [("A", a_rx), ("B", b_rx), ("C", c_rx)] {
        println!("{name}: {:?}", block_on(rx.collect::<Vec<_>>()));
    }

    Ok(())
}

fn push(source: &mut mpsc::Sender<i32>, value: i32) {
    if block_on(source.send(value)).is_err() {
        println!("source closed, {value} was not sent");
    }
}
