use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use evlink::{ConsumerFn, DispatchConfig, Dispatcher, EventLink, ListenerFn};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let consumed = Arc::new(AtomicUsize::new(0));
    let observed = Arc::new(AtomicUsize::new(0));

    let mut link = EventLink::<u64>::new("base");
    let counter = Arc::clone(&consumed);
    link.set_answerless_consumer(ConsumerFn::arc("sink", move |n: &u64| {
        println!("consumed: {n}");
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }));
    let counter = Arc::clone(&observed);
    link.add_listener(ListenerFn::arc("observer", move |n: &u64| {
        println!("observed: {n}");
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }))
    .unwrap();

    let link = Arc::new(link);
    let dispatcher = Dispatcher::spawn(
        Arc::clone(&link),
        DispatchConfig {
            workers: 2,
            debug_tracer: true,
            ..DispatchConfig::default()
        },
    )
    .unwrap();

    let producer1 = {
        let link = Arc::clone(&link);
        tokio::spawn(async move {
            for n in 1..32u64 {
                let mut event = link.reserve().await.unwrap();
                event.fill(n);
                event.commit().await;
            }
        })
    };
    let producer2 = {
        let link = Arc::clone(&link);
        tokio::spawn(async move {
            for n in 32..64u64 {
                let mut event = link.reserve().await.unwrap();
                event.fill(n);
                event.commit().await;
            }
        })
    };

    let _ = tokio::join!(producer1, producer2);

    dispatcher.stop_when_empty().await;
    dispatcher.shutdown().await;

    println!(
        "consumed {} events, observed {}",
        consumed.load(Ordering::Relaxed),
        observed.load(Ordering::Relaxed)
    );
}
