//! Asynchronous byte channel over the accessory bulk endpoints.

use bytes::{Bytes, BytesMut};
use futures::{sink, stream, Sink, SinkExt, Stream, StreamExt};
use rusb::{DeviceHandle, UsbContext};
use std::{
    fmt,
    future::Future,
    io::{Error, ErrorKind, Result},
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll},
    thread::{self, JoinHandle},
    time::Duration,
};
use tokio::{
    sync::{mpsc, oneshot, oneshot::error::TryRecvError},
    task::spawn_blocking,
};

use super::{guard::InUseGuard, native::to_transfer_err, RusbTransport};
use crate::{transport::TransferError, Accessory};

const TIMEOUT: Duration = Duration::from_secs(1);

/// Size of a single bulk read.
const TRANSFER_SIZE: usize = 16_384;

fn closed_err(error: Option<TransferError>) -> Error {
    match error {
        Some(err) => crate::Error::Transport(err).into(),
        None => Error::new(ErrorKind::BrokenPipe, "accessory channel closed"),
    }
}

/// Sends data to the accessory.
pub struct AccessorySender {
    tx: mpsc::Sender<Bytes>,
    shared: Arc<ChannelShared>,
}

impl fmt::Debug for AccessorySender {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("AccessorySender").field(&self.shared.name).finish()
    }
}

impl AccessorySender {
    /// Send data.
    ///
    /// ## Cancel safety
    /// If canceled, no data will have been sent.
    pub async fn send(&self, data: Bytes) -> Result<()> {
        match self.tx.send(data).await {
            Ok(()) => Ok(()),
            Err(_) => Err(closed_err(*self.shared.error.lock().unwrap())),
        }
    }

    /// Wait until the channel is closed.
    pub fn closed(&self) -> impl Future<Output = ()> {
        let tx = self.tx.clone();
        async move { tx.closed().await }
    }

    /// Turns this into a sink.
    pub fn into_sink(self) -> AccessorySink {
        let sink = sink::unfold(self, |this, data: Bytes| async move {
            this.send(data).await?;
            Ok(this)
        });

        AccessorySink(Box::pin(sink))
    }
}

/// Sink into the accessory.
pub struct AccessorySink(Pin<Box<dyn Sink<Bytes, Error = Error> + Send + Sync + 'static>>);

impl fmt::Debug for AccessorySink {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("AccessorySink").finish()
    }
}

impl Sink<Bytes> for AccessorySink {
    type Error = Error;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Result<()>> {
        Pin::into_inner(self).0.poll_ready_unpin(cx)
    }

    fn start_send(self: Pin<&mut Self>, item: Bytes) -> Result<()> {
        Pin::into_inner(self).0.start_send_unpin(item)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Result<()>> {
        Pin::into_inner(self).0.poll_flush_unpin(cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Result<()>> {
        Pin::into_inner(self).0.poll_close_unpin(cx)
    }
}

/// Receives data from the accessory.
pub struct AccessoryReceiver {
    rx: mpsc::Receiver<BytesMut>,
    shared: Arc<ChannelShared>,
}

impl fmt::Debug for AccessoryReceiver {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("AccessoryReceiver").field(&self.shared.name).finish()
    }
}

impl AccessoryReceiver {
    /// Receive the data of the next bulk transfer.
    ///
    /// ## Cancel safety
    /// If canceled, no data will have been removed from the receive queue.
    pub async fn recv(&mut self) -> Result<BytesMut> {
        match self.rx.recv().await {
            Some(data) => Ok(data),
            None => Err(closed_err(*self.shared.error.lock().unwrap())),
        }
    }

    /// Turns this into a stream.
    pub fn into_stream(self) -> AccessoryStream {
        let stream = stream::try_unfold(self, |mut this| async move {
            match this.recv().await {
                Ok(data) => Ok(Some((data, this))),
                Err(err) if err.kind() == ErrorKind::BrokenPipe => Ok(None),
                Err(err) => Err(err),
            }
        });

        AccessoryStream(Box::pin(stream))
    }
}

/// Stream of data from the accessory.
pub struct AccessoryStream(Pin<Box<dyn Stream<Item = Result<BytesMut>> + Send + Sync + 'static>>);

impl fmt::Debug for AccessoryStream {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("AccessoryStream").finish()
    }
}

impl Stream for AccessoryStream {
    type Item = Result<BytesMut>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
        Pin::into_inner(self).0.poll_next_unpin(cx)
    }
}

struct ChannelShared {
    name: String,
    error: Arc<Mutex<Option<TransferError>>>,
    in_thread: Option<JoinHandle<()>>,
    out_thread: Option<JoinHandle<()>>,
    stop_tx: Option<oneshot::Sender<()>>,
}

impl Drop for ChannelShared {
    fn drop(&mut self) {
        tracing::debug!("waiting for IO threads");
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        for thread in [self.in_thread.take(), self.out_thread.take()].into_iter().flatten() {
            if thread.join().is_err() {
                tracing::warn!("accessory IO thread panicked");
            }
        }
        tracing::debug!("IO threads finished");
    }
}

/// Opens a byte channel over the bulk endpoints of a connected accessory.
///
/// Data still queued in the IN endpoint from an earlier connection is discarded.
/// The accessory session must keep being polled to notice detachment; the channel closes with an
/// error once the device is gone.
pub async fn channel<C: UsbContext + 'static>(
    accessory: &Accessory<RusbTransport<C>>,
) -> Result<(AccessorySender, AccessoryReceiver)> {
    let endpoints = *accessory.endpoints().ok_or(crate::Error::NotConnected)?;
    let transport = accessory.transport();
    let (Some(hnd), Some((bus, address))) = (transport.handle(), transport.location()) else {
        return Err(crate::Error::NotConnected.into());
    };

    let guard = Arc::new(InUseGuard::new(bus, address)?);
    let ep_in = endpoints.input.address | 0x80;
    let ep_out = endpoints.output.address;
    let max_packet_size = usize::from(endpoints.output.max_packet_size).max(1);

    // Flush stale data.
    let hnd_task = hnd.clone();
    spawn_blocking(move || {
        hnd_task.clear_halt(ep_in)?;
        hnd_task.clear_halt(ep_out)?;
        let mut buf = vec![0; TRANSFER_SIZE];
        while let Ok(n) = hnd_task.read_bulk(ep_in, &mut buf, Duration::from_millis(10)) {
            if n == 0 {
                break;
            }
            tracing::debug!("discarded {n} stale bytes");
        }
        Ok::<_, rusb::Error>(())
    })
    .await
    .map_err(Error::other)?
    .map_err(|err| Error::from(crate::Error::Transport(to_transfer_err(err))))?;
    tracing::debug!("accessory channel is open");

    // Start handler threads.
    let error = Arc::new(Mutex::new(None));
    let name = format!("{bus}-{address}");

    let hnd_in = hnd.clone();
    let error_in = error.clone();
    let (tx_in, rx_in) = mpsc::channel(16);
    let in_guard = guard.clone();
    let in_thread = thread::Builder::new().name(format!("AOA {name} in")).spawn(move || {
        let _in_guard = in_guard;
        in_thread(hnd_in, tx_in, ep_in, error_in)
    })?;

    let (tx_out, rx_out) = mpsc::channel(16);
    let error_out = error.clone();
    let (stop_tx, stop_rx) = oneshot::channel();
    let out_thread = thread::Builder::new().name(format!("AOA {name} out")).spawn(move || {
        let _out_guard = guard;
        out_thread(hnd, rx_out, ep_out, error_out, stop_rx, max_packet_size)
    })?;

    let shared = Arc::new(ChannelShared {
        name,
        error,
        in_thread: Some(in_thread),
        out_thread: Some(out_thread),
        stop_tx: Some(stop_tx),
    });
    let sender = AccessorySender { tx: tx_out, shared: shared.clone() };
    let recv = AccessoryReceiver { rx: rx_in, shared };

    Ok((sender, recv))
}

fn in_thread<C: UsbContext>(
    hnd: Arc<DeviceHandle<C>>, tx: mpsc::Sender<BytesMut>, ep: u8, error: Arc<Mutex<Option<TransferError>>>,
) {
    while !tx.is_closed() {
        let mut buf = BytesMut::zeroed(TRANSFER_SIZE);
        match hnd.read_bulk(ep, &mut buf, TIMEOUT) {
            Ok(0) => (),
            Ok(n) => {
                #[cfg(feature = "trace-packets")]
                tracing::trace!("received {n} bytes");
                buf.truncate(n);
                if tx.blocking_send(buf).is_err() {
                    break;
                }
            }
            Err(rusb::Error::Timeout) => (),
            Err(err) => {
                tracing::warn!("receiving failed: {err}");
                *error.lock().unwrap() = Some(to_transfer_err(err));
                break;
            }
        }
    }
}

fn out_thread<C: UsbContext>(
    hnd: Arc<DeviceHandle<C>>, mut rx: mpsc::Receiver<Bytes>, ep: u8, error: Arc<Mutex<Option<TransferError>>>,
    mut stop_rx: oneshot::Receiver<()>, max_packet_size: usize,
) {
    'outer: while let Some(mut data) = rx.blocking_recv() {
        let mut zlp = needs_zlp(data.len(), max_packet_size);
        loop {
            match stop_rx.try_recv() {
                Err(TryRecvError::Empty) => (),
                _ => break 'outer,
            }

            match hnd.write_bulk(ep, &data, TIMEOUT) {
                Ok(n) if n < data.len() => {
                    #[cfg(feature = "trace-packets")]
                    tracing::trace!("sent {n} bytes");
                    let _ = data.split_to(n);
                }
                Ok(_n) => {
                    #[cfg(feature = "trace-packets")]
                    tracing::trace!("sent {_n} bytes");
                    if !zlp {
                        break;
                    }
                    // Zero length packet ends the transfer on the device side.
                    zlp = false;
                    data = Bytes::new();
                }
                Err(rusb::Error::Timeout) => (),
                Err(err) => {
                    tracing::warn!("sending failed: {err}");
                    *error.lock().unwrap() = Some(to_transfer_err(err));
                    break 'outer;
                }
            }
        }
    }
}

/// Whether a transfer of `len` bytes must be followed by a zero length packet.
fn needs_zlp(len: usize, max_packet_size: usize) -> bool {
    len != 0 && len % max_packet_size == 0
}
