use crate::{
    context::{CallContext, CancelToken},
    dispatcher::Dispatcher,
};
use std::{
    io,
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
    sync::mpsc,
    task,
};
use tracing::{info, trace, warn};

/// Lines read ahead of the call currently running on a connection.
const LINE_BACKLOG: usize = 64;

pub struct Server {
    dispatcher: Dispatcher,
    cancel: CancelToken,
}

impl Server {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            cancel: CancelToken::new(),
        }
    }

    /// Token that stops the server when cancelled. Running calls observe it
    /// through [`CallContext::is_cancelled`], as they do their client
    /// disconnecting.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub async fn serve_tcp(self, port: u16) -> io::Result<()> {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await?;
        self.serve(listener).await
    }

    pub async fn serve(self, listener: TcpListener) -> io::Result<()> {
        info!(addr = %listener.local_addr()?, "server running");
        let root_arc = Arc::new(self);
        loop {
            let (sock, addr) = tokio::select! {
                accepted = listener.accept() => accepted?,
                _ = root_arc.cancel.cancelled() => {
                    info!("server shutting down");
                    return Ok(());
                }
            };

            let arc_self = root_arc.clone();
            task::spawn(async move {
                if let Err(err) = arc_self.serve_connection(sock, addr).await {
                    warn!(peer = %addr, error = %err, "connection failed");
                }
            });
        }
    }

    async fn serve_connection(
        self: Arc<Self>,
        sock: TcpStream,
        peer: SocketAddr,
    ) -> io::Result<()> {
        info!(%peer, "client connected");
        let (read, write) = sock.into_split();

        // Tripped by shutdown or by the peer going away, whichever comes first.
        let conn_cancel = CancelToken::new();
        let (lines_tx, lines_rx) = mpsc::channel(LINE_BACKLOG);
        let reader = task::spawn(read_lines(
            read,
            lines_tx,
            self.cancel.clone(),
            conn_cancel.clone(),
        ));

        let ctx = CallContext::new(conn_cancel.clone()).with_peer(peer);
        let answered = self.answer_lines(lines_rx, write, &ctx).await;

        conn_cancel.cancel();
        reader.abort();
        let read = match reader.await {
            Ok(read) => read,
            Err(err) if err.is_cancelled() => Ok(()),
            Err(err) => Err(io::Error::new(io::ErrorKind::Other, err)),
        };

        info!(%peer, "client disconnected");
        answered.and(read)
    }

    async fn answer_lines(
        &self,
        mut lines: mpsc::Receiver<String>,
        mut write: OwnedWriteHalf,
        ctx: &CallContext,
    ) -> io::Result<()> {
        while let Some(line) = lines.recv().await {
            // Operations run synchronously, keep them off the reactor.
            let dispatcher = self.dispatcher.clone();
            let call_ctx = ctx.clone();
            let reply = task::spawn_blocking(move || dispatcher.handle(&call_ctx, line.as_bytes()))
                .await
                .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;

            if let Some(reply) = reply {
                trace!(peer = ?ctx.peer(), status = ?reply.status, "replying");
                write.write_all(&reply.body).await?;
                write.write_all(b"\n").await?;
            }
        }
        Ok(())
    }
}

/// Feeds request lines to the connection's call loop. Keeps reading while a
/// call runs so that a disconnect is noticed and reported through `conn_cancel`.
async fn read_lines(
    read: OwnedReadHalf,
    lines_tx: mpsc::Sender<String>,
    shutdown: CancelToken,
    conn_cancel: CancelToken,
) -> io::Result<()> {
    let mut lines = BufReader::new(read).lines();
    let result = loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = shutdown.cancelled() => break Ok(()),
        };
        match line {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => {
                if lines_tx.send(line).await.is_err() {
                    break Ok(());
                }
            }
            Ok(None) => break Ok(()),
            Err(err) => break Err(err),
        }
    };
    conn_cancel.cancel();
    result
}
