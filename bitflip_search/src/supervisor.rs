/*!
Runs the detection loop next to the beam position feed.

The two run as separate tasks. Whichever finishes first decides the outcome:
a finished search ends the feed, a closed feed (or an external shutdown)
stops the search at its next suspension point.
*/

use mimosis::Transport;
use tokio::io::AsyncBufRead;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::detector::{BitFlipSearch, SearchError, SearchOutcome, StopReason};
use crate::shutdown::{self, ShutdownSignal};
use crate::subscriber::BeamPositionSubscriber;

/// Aborts the task when dropped
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn task_error(e: tokio::task::JoinError) -> SearchError {
    SearchError::Task(e.to_string())
}

/// Run `search` until it stops, `feed` closes, or `shutdown` fires
pub async fn supervise<T, R>(
    search: BitFlipSearch<T>,
    feed: BeamPositionSubscriber<R>,
    mut shutdown: ShutdownSignal,
) -> Result<SearchOutcome, SearchError>
where
    T: Transport + Send + 'static,
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let (stop, stop_signal) = shutdown::channel();
    let mut search_task = AbortOnDrop(tokio::spawn(search.run(stop_signal)));
    let mut feed_task = AbortOnDrop(tokio::spawn(feed.run()));

    let feed_closed = tokio::select! {
        result = &mut search_task.0 => return result.map_err(task_error)?,
        result = &mut feed_task.0 => {
            match result {
                Ok(Ok(lines)) => info!("📴 Beam feed ended after {} lines, stopping search", lines),
                Ok(Err(e)) => error!("❌ Beam feed failed: {}", e),
                Err(e) => error!("❌ Beam feed task failed: {}", e),
            }
            true
        }
        _ = shutdown.triggered() => false,
    };

    stop.fire();
    let mut outcome = (&mut search_task.0).await.map_err(task_error)??;
    if feed_closed && outcome.stop == StopReason::Cancelled {
        outcome.stop = StopReason::FeedClosed;
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{RegisterProbe, SearchSettings};
    use crate::subscriber::{PositionHandle, ScanPosition};
    use mimosis::{Chip, ChipId, RegisterBlock, SimulatedDevice};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};

    /// Subscriber connected to a local publisher socket
    async fn tcp_feed() -> (BeamPositionSubscriber<BufReader<TcpStream>>, PositionHandle, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (connected, accepted) = tokio::join!(
            BeamPositionSubscriber::connect("127.0.0.1", port),
            listener.accept()
        );
        let (subscriber, position) = connected.unwrap();
        let (publisher, _) = accepted.unwrap();
        (subscriber, position, publisher)
    }

    /// Wait for the subscriber side of the socket to go away
    async fn assert_released(publisher: &mut TcpStream) {
        let mut buf = [0u8; 16];
        let read = tokio::time::timeout(Duration::from_secs(2), publisher.read(&mut buf))
            .await
            .expect("feed connection still open");
        assert_eq!(read.unwrap(), 0);
    }

    fn stable_search(
        interval: Duration,
    ) -> (BitFlipSearch<SimulatedDevice>, crossbeam_channel::Receiver<crate::detector::BitFlipEvent>) {
        let id = ChipId::new(1).unwrap();
        let mut chip = Chip::new(SimulatedDevice::new(id), id);
        chip.write_block_or_default(RegisterBlock::GenConf, None).unwrap();

        let (tx, rx) = crossbeam_channel::unbounded();
        let search = BitFlipSearch::new(
            chip,
            RegisterProbe::block(RegisterBlock::GenConf),
            SearchSettings::new(interval),
            tx,
        )
        .unwrap();
        (search, rx)
    }

    #[tokio::test]
    async fn test_closed_feed_stops_search() {
        let feed: &'static [u8] = b"start_run 1\n";
        let (subscriber, position) = BeamPositionSubscriber::new(feed);
        let (search, rx) = stable_search(Duration::from_millis(5));

        let outcome = supervise(search.with_position(position), subscriber, ShutdownSignal::never())
            .await
            .unwrap();

        assert_eq!(outcome.stop, StopReason::FeedClosed);
        assert_eq!(outcome.events, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_external_shutdown_while_feed_open() {
        let (client, server) = tokio::io::duplex(64);
        let (subscriber, position) = BeamPositionSubscriber::new(BufReader::new(server));
        let (search, _rx) = stable_search(Duration::from_millis(5));

        let (trigger, signal) = shutdown::channel();
        let run = tokio::spawn(supervise(search.with_position(position), subscriber, signal));
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.fire();

        let outcome = run.await.unwrap().unwrap();
        assert_eq!(outcome.stop, StopReason::Cancelled);
        assert!(outcome.iterations > 0);
        drop(client);
    }

    #[tokio::test]
    async fn test_event_carries_feed_position() {
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(b"start_run 5\npos 1 2\n").await.unwrap();
        let (subscriber, position) = BeamPositionSubscriber::new(BufReader::new(server));

        let id = ChipId::new(1).unwrap();
        let chip = Chip::new(SimulatedDevice::new(id), id);
        let mut reads = 0;
        let probe = RegisterProbe::custom("readTest", move |_: &mut Chip<SimulatedDevice>| {
            reads += 1;
            Ok(if reads >= 5 { vec![0x01] } else { vec![0x00] })
        });
        let (tx, rx) = crossbeam_channel::unbounded();
        let search = BitFlipSearch::new(chip, probe, SearchSettings::new(Duration::from_millis(10)), tx)
            .unwrap()
            .with_position(position);

        let outcome = supervise(search, subscriber, ShutdownSignal::never()).await.unwrap();

        assert_eq!(outcome.stop, StopReason::BitFlipFound);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.iteration, 4);
        assert_eq!(
            event.position,
            ScanPosition { scan_id: Some(5), x: Some(1), y: Some(2) }
        );
        drop(client);
    }

    #[tokio::test]
    async fn test_connection_released_after_bit_flip() {
        let (subscriber, position, mut publisher) = tcp_feed().await;
        publisher.write_all(b"start_run 3\n").await.unwrap();

        let id = ChipId::new(1).unwrap();
        let chip = Chip::new(SimulatedDevice::new(id), id);
        let mut reads = 0;
        let probe = RegisterProbe::custom("readTest", move |_: &mut Chip<SimulatedDevice>| {
            reads += 1;
            Ok(if reads >= 3 { vec![0x80] } else { vec![0x00] })
        });
        let (tx, _rx) = crossbeam_channel::unbounded();
        let search = BitFlipSearch::new(chip, probe, SearchSettings::new(Duration::from_millis(5)), tx)
            .unwrap()
            .with_position(position);

        let outcome = supervise(search, subscriber, ShutdownSignal::never()).await.unwrap();
        assert_eq!(outcome.stop, StopReason::BitFlipFound);
        assert_eq!(outcome.iterations, 2);

        assert_released(&mut publisher).await;
    }

    #[tokio::test]
    async fn test_dropping_supervisor_cancels_both_tasks() {
        let (subscriber, position, mut publisher) = tcp_feed().await;
        let (search, rx) = stable_search(Duration::from_millis(5));

        let run = supervise(search.with_position(position), subscriber, ShutdownSignal::never());
        let timed_out = tokio::time::timeout(Duration::from_millis(30), run).await;
        assert!(timed_out.is_err());

        // The search task owned the only event sender
        assert_released(&mut publisher).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(rx.try_recv(), Err(crossbeam_channel::TryRecvError::Disconnected));
    }
}
