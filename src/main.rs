#[macro_use]
extern crate log;

use std::fs;
use std::io::{self, Read};

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use zwave::{Controller, Frame, MessageClass, MessageType};

/// Raw frames buffered between the capture reader and the controller.
const FEED_DEPTH: usize = 16;

fn read_capture(path: Option<&str>) -> Result<String> {
    match path {
        Some(path) => fs::read_to_string(path).with_context(|| format!("reading {}", path)),
        None => {
            let mut capture = String::new();
            io::stdin()
                .read_to_string(&mut capture)
                .context("reading stdin")?;
            Ok(capture)
        }
    }
}

/// One hex-encoded frame per line. Whitespace is ignored and `#` starts a comment.
fn parse_capture(capture: &str) -> Result<Vec<Vec<u8>>> {
    let mut buffers = Vec::new();
    for (number, line) in capture.lines().enumerate() {
        let line = line.split('#').next().unwrap_or_default();
        let digits: String = line.chars().filter(|c| !c.is_whitespace()).collect();
        if digits.is_empty() {
            continue;
        }

        let buffer = hex::decode(&digits).with_context(|| format!("line {}", number + 1))?;
        buffers.push(buffer);
    }
    Ok(buffers)
}

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init();

    let args = std::env::args().collect::<Vec<_>>();
    let capture = read_capture(args.get(1).map(String::as_str))?;
    let buffers = parse_capture(&capture)?;
    info!("replaying {} frames", buffers.len());

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let (transmit_tx, mut transmit_rx) = mpsc::unbounded_channel::<Frame>();
    let (feed_tx, feed_rx) = mpsc::channel(FEED_DEPTH);

    // Captures rarely start at the beginning of an interview, so any node that sends us a command
    // is treated as already included.
    let mut controller = Controller::new(events_tx, transmit_tx);
    for buffer in &buffers {
        if let Ok(frame) = Frame::from_bytes(buffer) {
            if frame.message_type() == MessageType::Request
                && frame.message_class() == MessageClass::ApplicationCommandHandler
            {
                controller.add_node(frame.node_id())?;
            }
        }
    }

    let events = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            info!(
                "node {} endpoint {}: {} = {:#04x}",
                event.node_id, event.endpoint, event.command_class, event.value
            );
        }
    });

    let transmit = tokio::spawn(async move {
        while let Some(frame) = transmit_rx.recv().await {
            match frame.to_bytes() {
                Ok(bytes) => info!("would send ({:?}) {}", frame.priority(), hex::encode(bytes)),
                Err(error) => error!("cannot encode {:?}: {}", frame, error),
            }
        }
    });

    let controller = tokio::spawn(controller.run(feed_rx));

    for buffer in buffers {
        feed_tx.send(buffer).await?;
    }
    drop(feed_tx);

    let controller = controller.await?;
    for node in controller.nodes() {
        info!("node {} finished in stage {:?}", node.id(), node.stage());
    }

    // Dropping the controller closes the event bus and the transmit queue.
    drop(controller);
    events.await?;
    transmit.await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_skips_comments_and_whitespace() {
        let capture = "# switch report\n01 09 00 04 00 05 03 25 03 ff 2a\n\n  0106  # ack\n";

        let buffers = parse_capture(capture).unwrap();

        assert_eq!(
            buffers,
            vec![
                vec![0x01, 0x09, 0x00, 0x04, 0x00, 0x05, 0x03, 0x25, 0x03, 0xFF, 0x2A],
                vec![0x01, 0x06],
            ]
        );
    }

    #[test]
    fn capture_reports_bad_line() {
        let error = parse_capture("0101\nzz\n").unwrap_err();

        assert!(error.to_string().contains("line 2"));
    }
}
