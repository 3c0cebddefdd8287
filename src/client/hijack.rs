//! Raw byte streams over a connection the daemon has switched away from HTTP.
//!
//! Once the upgrade completes the connection is split. One task pumps the
//! caller's input to the daemon; the other forwards whatever the daemon sends
//! into the response body. Both sides move one chunk at a time through
//! channels with a single slot, so neither a slow caller nor a slow daemon
//! makes the other side buffer without bound.
//!
//! The body channel never carries an empty chunk except as the last item,
//! marking a clean end of stream. A channel that closes without it was torn
//! down, for example by the client shutting down.

use std::io;

use bytes::Bytes;
use futures_util::future::{self, Either};
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::mpsc,
};

use super::{
    body::{spawn_reader, CHUNK_SIZE},
    request::HijackInput,
};

/// Starts both pumps and returns the receiving end of the response body.
pub(crate) fn spawn(upgraded: Upgraded, input: HijackInput) -> mpsc::Receiver<io::Result<Bytes>> {
    let (tx, rx) = mpsc::channel(1);
    let input = spawn_reader(input);
    tokio::spawn(run(TokioIo::new(upgraded), input, tx));
    rx
}

async fn run<T>(io: T, input: mpsc::Receiver<io::Result<Bytes>>, tx: mpsc::Sender<io::Result<Bytes>>)
where
    T: AsyncRead + AsyncWrite,
{
    let (reader, writer) = tokio::io::split(io);
    let body = tx.downgrade();

    let outbound = async move {
        match outbound(writer, input).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // Only the inbound pump keeps the body alive.
                if let Some(tx) = body.upgrade() {
                    let _ = tx.send(Err(copy_err(&e))).await;
                }
                Err(e)
            }
        }
    };

    match future::try_join(outbound, inbound(reader, tx)).await {
        Ok(((), ())) => trace!("hijacked session finished"),
        Err(e) => debug!("hijacked session ended: {}", e),
    }
    // Both halves drop here, closing the connection.
}

/// Writes every input chunk, then half-closes the connection.
async fn outbound<W>(mut writer: W, mut input: mpsc::Receiver<io::Result<Bytes>>) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(chunk) = input.recv().await {
        let chunk = chunk?;
        writer.write_all(&chunk).await?;
        writer.flush().await?;
        trace!("hijack wrote {} bytes", chunk.len());
    }
    trace!("hijack input finished, shutting down write half");
    writer.shutdown().await
}

/// Forwards the daemon's bytes to the body until end of stream.
///
/// The next read is only issued once the previous chunk was taken.
async fn inbound<R>(mut reader: R, tx: mpsc::Sender<io::Result<Bytes>>) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0; CHUNK_SIZE];
    loop {
        let n = {
            let read = reader.read(&mut buf);
            let detached = tx.closed();
            futures_util::pin_mut!(read, detached);

            match future::select(read, detached).await {
                Either::Left((Ok(n), _)) => n,
                Either::Left((Err(e), _)) => {
                    let _ = tx.send(Err(copy_err(&e))).await;
                    return Err(e);
                }
                Either::Right(((), _)) => return Err(detached_err()),
            }
        };

        if n == 0 {
            trace!("hijacked stream reached end of input");
            if tx.send(Ok(end_of_stream())).await.is_err() {
                return Err(detached_err());
            }
            return Ok(());
        }

        if tx.send(Ok(Bytes::copy_from_slice(&buf[..n]))).await.is_err() {
            return Err(detached_err());
        }
    }
}

/// The marker sent after the last chunk of a cleanly finished stream.
pub(crate) fn end_of_stream() -> Bytes {
    Bytes::new()
}

fn detached_err() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "hijacked stream reader dropped")
}

fn copy_err(e: &io::Error) -> io::Error {
    io::Error::new(e.kind(), e.to_string())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::duplex;

    use super::*;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime")
    }

    #[test]
    fn input_eof_half_closes_and_output_keeps_flowing() {
        let rt = runtime();
        rt.block_on(async {
            let (ours, mut daemon) = duplex(64);
            let (in_tx, in_rx) = mpsc::channel(1);
            let (out_tx, mut out_rx) = mpsc::channel(1);
            let session = tokio::spawn(run(ours, in_rx, out_tx));

            in_tx.send(Ok(Bytes::from_static(b"ping"))).await.unwrap();
            drop(in_tx);

            let mut got = Vec::new();
            daemon.read_to_end(&mut got).await.unwrap();
            assert_eq!(got, b"ping");

            daemon.write_all(b"pong").await.unwrap();
            assert_eq!(&out_rx.recv().await.unwrap().unwrap()[..], b"pong");

            drop(daemon);
            assert!(out_rx.recv().await.unwrap().unwrap().is_empty());
            assert!(out_rx.recv().await.is_none());
            session.await.unwrap();
        });
    }

    #[test]
    fn dropping_the_body_ends_the_session() {
        let rt = runtime();
        rt.block_on(async {
            let (ours, _daemon) = duplex(64);
            let (_in_tx, in_rx) = mpsc::channel(1);
            let (out_tx, out_rx) = mpsc::channel(1);
            let session = tokio::spawn(run(ours, in_rx, out_tx));

            drop(out_rx);
            tokio::time::timeout(Duration::from_secs(1), session)
                .await
                .expect("session ended")
                .unwrap();
        });
    }

    #[test]
    fn input_failure_reaches_the_body() {
        let rt = runtime();
        rt.block_on(async {
            let (ours, _daemon) = duplex(64);
            let (in_tx, in_rx) = mpsc::channel(1);
            let (out_tx, mut out_rx) = mpsc::channel(1);
            let session = tokio::spawn(run(ours, in_rx, out_tx));

            in_tx
                .send(Err(io::Error::new(io::ErrorKind::Other, "stdin closed badly")))
                .await
                .unwrap();

            let err = out_rx.recv().await.unwrap().unwrap_err();
            assert_eq!(err.to_string(), "stdin closed badly");
            assert!(out_rx.recv().await.is_none());
            session.await.unwrap();
        });
    }
}
