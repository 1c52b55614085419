//! Upstream fan-out race.

use std::net::SocketAddr;
use std::time::Duration;

use hickory_proto::op::Message;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::warn;

use super::exchange::Exchanger;

/// Races `query` against `upstreams` in order and returns the first usable
/// reply, or `None` when every exchange failed.
///
/// One exchange is dispatched per upstream, in order, without waiting for
/// earlier ones to finish. After each dispatch the race waits up to
/// `step_timeout` for any in-flight exchange to deliver; a failed exchange
/// only shortens the wait when nothing else is still in flight. After the
/// last dispatch, remaining in-flight exchanges are drained until one
/// delivers or all have reported.
///
/// Delivery runs over a channel bounded to the number of upstreams, so no
/// exchange task ever blocks on it. Dropping the receiver when the race
/// ends is the shutdown handshake: a late send observes the closed channel
/// and the abandoned reply is discarded, never observed by a later race.
/// Exchanges are abandoned rather than cancelled; their own transport
/// timeout bounds how long they linger.
///
/// When several upstreams deliver within one step window, whichever reply
/// the channel yields first wins; the choice is intentionally
/// nondeterministic.
pub async fn race(
    exchanger: &Exchanger,
    upstreams: &[SocketAddr],
    step_timeout: Duration,
    query: &Message,
) -> Option<Message> {
    if upstreams.is_empty() {
        return None;
    }

    let (tx, mut rx) = mpsc::channel::<Option<Message>>(upstreams.len());
    let mut in_flight = 0usize;
    let mut winner: Option<Message> = None;

    'dispatch: for &upstream in upstreams {
        let tx = tx.clone();
        let exchanger = exchanger.clone();
        let query = query.clone();
        in_flight += 1;
        tokio::spawn(async move {
            let outcome = match exchanger.exchange(&query, upstream).await {
                Ok(reply) => Some(reply),
                Err(err) => {
                    warn!(upstream = %upstream, error = %err, "upstream exchange failed");
                    None
                }
            };
            let _ = tx.send(outcome).await;
        });

        let step = sleep(step_timeout);
        tokio::pin!(step);
        loop {
            tokio::select! {
                _ = &mut step => break,
                delivery = rx.recv() => match delivery {
                    Some(Some(reply)) => {
                        winner = Some(reply);
                        break 'dispatch;
                    }
                    Some(None) => {
                        in_flight -= 1;
                        if in_flight == 0 {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    }
    drop(tx);

    // Every spawned exchange eventually reports (its transport timeout sees
    // to that), so this terminates: first usable reply, or channel closure
    // once all senders are gone.
    while winner.is_none() {
        match rx.recv().await {
            Some(Some(reply)) => winner = Some(reply),
            Some(None) => {}
            None => break,
        }
    }
    winner
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::{MessageType, Query};
    use hickory_proto::rr::{Name, RecordType};
    use std::str::FromStr;
    use std::time::Instant;
    use tokio::net::UdpSocket;

    fn test_query(id: u16) -> Message {
        let mut query = Message::new();
        query.set_id(id).add_query(Query::query(
            Name::from_str("race.example.").unwrap(),
            RecordType::A,
        ));
        query
    }

    #[derive(Clone, Copy)]
    enum Stub {
        /// Reply after the given delay.
        Answer(Duration),
        /// Accept the datagram and never answer.
        Hang,
        /// Reply with bytes that do not parse.
        Garbage,
    }

    async fn stub_upstream(behavior: Stub) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 512];
            loop {
                let (len, src) = match socket.recv_from(&mut buf).await {
                    Ok(received) => received,
                    Err(_) => return,
                };
                match behavior {
                    Stub::Hang => continue,
                    Stub::Garbage => {
                        let _ = socket.send_to(b"not a dns message", src).await;
                    }
                    Stub::Answer(delay) => {
                        let query = match Message::from_vec(&buf[..len]) {
                            Ok(query) => query,
                            Err(_) => continue,
                        };
                        sleep(delay).await;
                        let mut reply = Message::new();
                        reply
                            .set_id(query.id())
                            .set_message_type(MessageType::Response)
                            .set_recursion_available(true);
                        reply.add_queries(query.queries().to_vec());
                        let _ = socket.send_to(&reply.to_vec().unwrap(), src).await;
                    }
                }
            }
        });
        addr
    }

    #[tokio::test]
    async fn empty_upstream_list_yields_none() {
        let exchanger = Exchanger::default();
        let result = race(&exchanger, &[], Duration::from_millis(50), &test_query(1)).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn single_upstream_wins() {
        let upstream = stub_upstream(Stub::Answer(Duration::ZERO)).await;
        let exchanger = Exchanger::new(Duration::from_millis(500), 1);

        let reply = race(
            &exchanger,
            &[upstream],
            Duration::from_millis(100),
            &test_query(9),
        )
        .await
        .expect("reply");
        assert_eq!(reply.id(), 9);
    }

    #[tokio::test]
    async fn slow_first_upstream_does_not_block_fast_second() {
        let hung = stub_upstream(Stub::Hang).await;
        let fast = stub_upstream(Stub::Answer(Duration::from_millis(10))).await;
        let exchanger = Exchanger::new(Duration::from_secs(1), 1);

        let started = Instant::now();
        let reply = race(
            &exchanger,
            &[hung, fast],
            Duration::from_millis(50),
            &test_query(11),
        )
        .await
        .expect("reply from the fast upstream");
        let elapsed = started.elapsed();

        assert_eq!(reply.id(), 11);
        // One step window for the hung upstream plus the fast reply, with
        // scheduling slack.
        assert!(elapsed < Duration::from_millis(250), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn all_failures_yield_none() {
        let bad1 = stub_upstream(Stub::Garbage).await;
        let bad2 = stub_upstream(Stub::Garbage).await;
        let exchanger = Exchanger::new(Duration::from_millis(200), 1);

        let result = race(
            &exchanger,
            &[bad1, bad2],
            Duration::from_millis(50),
            &test_query(13),
        )
        .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn late_reply_is_still_collected_in_the_drain() {
        // Both upstreams outlive every step window; the drain phase picks up
        // the one that eventually answers.
        let hung = stub_upstream(Stub::Hang).await;
        let late = stub_upstream(Stub::Answer(Duration::from_millis(120))).await;
        let exchanger = Exchanger::new(Duration::from_secs(1), 1);

        let reply = race(
            &exchanger,
            &[hung, late],
            Duration::from_millis(30),
            &test_query(17),
        )
        .await
        .expect("late reply");
        assert_eq!(reply.id(), 17);
    }
}
