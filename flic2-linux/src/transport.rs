//! Bridge link: one TCP connection per button, each packet a length-prefixed frame.
//!
//! The first frame names the button (address, then 0 for public or 1 for random). After
//! that the bridge relays packets both ways until either side closes.

use flic2_core::wire::{decode_frame, encode_frame, FrameDecodeError};
use flic2_core::DeviceKey;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::manager::{LinkTag, LoopEvent};

/// An open bridge connection. Dropping it stops both tasks.
#[derive(Debug)]
pub struct BridgeLink {
    writer: mpsc::UnboundedSender<Vec<u8>>,
    tasks: [AbortHandle; 2],
}

impl BridgeLink {
    /// Queue one packet. The loop gets a `WriteDone` once it is on the socket.
    pub fn send(&self, packet: Vec<u8>) {
        if self.writer.send(packet).is_err() {
            log::trace!("bridge writer gone, packet dropped");
        }
    }
}

impl Drop for BridgeLink {
    fn drop(&mut self) {
        for t in &self.tasks {
            t.abort();
        }
    }
}

fn hello(key: DeviceKey) -> Vec<u8> {
    let mut out = key.address.as_wire().to_vec();
    out.push(key.address_type.is_random() as u8);
    out
}

pub async fn open(
    bridge: &str,
    key: DeviceKey,
    tag: LinkTag,
    events: mpsc::UnboundedSender<LoopEvent>,
) -> std::io::Result<BridgeLink> {
    let mut stream = TcpStream::connect(bridge).await?;
    stream.set_nodelay(true)?;
    let frame = encode_frame(&hello(key))
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    stream.write_all(&frame).await?;
    stream.flush().await?;

    let (mut reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();

    let write_events = events.clone();
    let write_task = tokio::spawn(async move {
        while let Some(packet) = rx.recv().await {
            let frame = match encode_frame(&packet) {
                Ok(f) => f,
                Err(e) => {
                    log::warn!("{tag}: dropping packet: {e}");
                    continue;
                }
            };
            if let Err(e) = writer.write_all(&frame).await {
                log::debug!("{tag}: write failed: {e}");
                break;
            }
            if write_events.send(LoopEvent::WriteDone { tag }).is_err() {
                log::trace!("{tag}: loop gone");
                break;
            }
        }
    });

    let read_task = tokio::spawn(async move {
        let mut buf: Vec<u8> = Vec::new();
        let mut chunk = [0u8; 512];
        'read: loop {
            let n = match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    log::debug!("{tag}: read failed: {e}");
                    break;
                }
            };
            buf.extend_from_slice(&chunk[..n]);
            loop {
                match decode_frame(&buf) {
                    Ok((packet, used)) => {
                        let packet = packet.to_vec();
                        buf.drain(..used);
                        if events.send(LoopEvent::Data { tag, packet }).is_err() {
                            log::trace!("{tag}: loop gone");
                            break 'read;
                        }
                    }
                    Err(FrameDecodeError::NeedMore) => break,
                    Err(FrameDecodeError::TooLarge) => {
                        log::warn!("{tag}: oversized frame from bridge");
                        break 'read;
                    }
                }
            }
        }
        if events.send(LoopEvent::Disconnected { tag }).is_err() {
            log::trace!("{tag}: loop gone before disconnect");
        }
    });

    Ok(BridgeLink {
        writer: tx,
        tasks: [write_task.abort_handle(), read_task.abort_handle()],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flic2_core::{AddressType, BdAddr};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    async fn next(rx: &mut mpsc::UnboundedReceiver<LoopEvent>) -> LoopEvent {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event in time")
            .expect("channel open")
    }

    #[tokio::test]
    async fn relays_frames_both_ways() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let bridge = listener.local_addr().unwrap().to_string();
        let key = DeviceKey {
            address: BdAddr::from_wire([1, 2, 3, 4, 5, 6]),
            address_type: AddressType::Random,
        };
        let tag = LinkTag {
            address: key.address,
            conn: 3,
        };
        let (events, mut rx) = mpsc::unbounded_channel();

        let (link, accepted) = tokio::join!(open(&bridge, key, tag, events), listener.accept());
        let link = link.unwrap();
        let (mut peer, _) = accepted.unwrap();

        let mut hello_frame = [0u8; 4 + 7];
        peer.read_exact(&mut hello_frame).await.unwrap();
        assert_eq!(hello_frame, [7, 0, 0, 0, 1, 2, 3, 4, 5, 6, 1]);

        link.send(vec![12, 0xaa]);
        let mut out = [0u8; 6];
        peer.read_exact(&mut out).await.unwrap();
        assert_eq!(out, [2, 0, 0, 0, 12, 0xaa]);
        assert!(matches!(next(&mut rx).await, LoopEvent::WriteDone { tag: t } if t == tag));

        // Two frames in one write, the second split across writes.
        peer.write_all(&[1, 0, 0, 0, 15, 3, 0, 0, 0, 20]).await.unwrap();
        peer.write_all(&[1, 2]).await.unwrap();
        match next(&mut rx).await {
            LoopEvent::Data { packet, .. } => assert_eq!(packet, vec![15]),
            other => panic!("unexpected {other:?}"),
        }
        match next(&mut rx).await {
            LoopEvent::Data { packet, .. } => assert_eq!(packet, vec![20, 1, 2]),
            other => panic!("unexpected {other:?}"),
        }

        drop(peer);
        assert!(matches!(next(&mut rx).await, LoopEvent::Disconnected { .. }));
    }
}
