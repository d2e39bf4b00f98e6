use tokio::sync::watch;

/// Sending half of a broadcast notification without payload.
pub type SignalTx = watch::Sender<()>;

/// Receiving half of a broadcast notification without payload.
pub type SignalRx = watch::Receiver<()>;

/// Creates a new pair of [`SignalTx`] and [`SignalRx`].
pub fn create_signal() -> (SignalTx, SignalRx) {
    watch::channel(())
}
