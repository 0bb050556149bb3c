use std::sync::Arc;

use evlink::{DispatchConfig, Dispatcher, EventLink, ResponderFn};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().init();

    let mut link = EventLink::<u32, u32>::new("squares");
    link.set_answerfull_consumer(ResponderFn::arc("square", |n: &u32| Ok(n * n)));

    let link = Arc::new(link);
    let dispatcher = Dispatcher::spawn(
        Arc::clone(&link),
        DispatchConfig {
            consume_answerless: false,
            consume_answerfull: true,
            ..DispatchConfig::default()
        },
    )
    .unwrap();

    for n in 0..10u32 {
        let mut event = link.reserve_for_answer().await.unwrap();
        event.fill(n);
        let ticket = event.commit().await;
        let answer = link.wait_for_answer(ticket).await.unwrap();
        println!("{n}^2 = {answer}");
    }

    dispatcher.stop_when_empty().await;
    dispatcher.shutdown().await;
}
