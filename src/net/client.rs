use crate::types::{Param, Request, Response, RpcError};
use serde::{de::DeserializeOwned, Serialize};
use std::io;
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream, ToSocketAddrs,
    },
};
use tracing::trace;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("RPC client error: {0}")]
    Io(#[from] io::Error),

    #[error("RPC client error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("RPC client error: {0}")]
    Rpc(#[from] RpcError),

    #[error("RPC client error: connection closed")]
    Closed,

    #[error("RPC client error: expected response to {expected}, got {got:?}")]
    IdMismatch { expected: i64, got: Option<i64> },
}

/// One connection to a [`Server`](super::server::Server). Calls are issued one
/// at a time.
pub struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    write: OwnedWriteHalf,
    next_id: i64,
}

impl Client {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let sock = TcpStream::connect(addr).await?;
        let (read, write) = sock.into_split();
        Ok(Self {
            lines: BufReader::new(read).lines(),
            write,
            next_id: 1,
        })
    }

    /// Calls `method` with positional `params`; see [`positional`] for how
    /// `params` is split. Pass a tuple: `(a, b)` for two params, `(list,)` for
    /// a single list param.
    pub async fn call<P, R>(&mut self, method: &str, params: P) -> Result<R, ClientError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let id = self.next_id;
        self.next_id += 1;
        self.send(Request::new(Some(id), method, positional(params)?))
            .await?;

        let line = self.lines.next_line().await?.ok_or(ClientError::Closed)?;
        let response: Response = serde_json::from_str(&line)?;
        if response.id != Some(id) {
            return Err(ClientError::IdMismatch {
                expected: id,
                got: response.id,
            });
        }
        Ok(serde_json::from_value(response.into_result()?)?)
    }

    /// Sends a request without an id. The server never answers it. `params` is
    /// split as in [`call`](Self::call).
    pub async fn notify<P>(&mut self, method: &str, params: P) -> Result<(), ClientError>
    where
        P: Serialize,
    {
        self.send(Request::new(None, method, positional(params)?))
            .await
    }

    async fn send(&mut self, request: Request) -> Result<(), ClientError> {
        trace!(method = %request.method, id = ?request.id, "sending");
        let mut line = serde_json::to_vec(&request)?;
        line.push(b'\n');
        self.write.write_all(&line).await?;
        Ok(())
    }
}

/// Splits `params` into positional params. Anything serializing to a JSON
/// array (tuples, but also a bare `Vec` or slice) is spread one element per
/// param, `()` and `None` give no params, and any other value is a single
/// param. A lone sequence argument must be wrapped: `(vec![1, 2],)`.
fn positional<P: Serialize>(params: P) -> Result<Vec<Param>, ClientError> {
    let values = match serde_json::to_value(params)? {
        serde_json::Value::Array(values) => values,
        serde_json::Value::Null => Vec::new(),
        value => vec![value],
    };
    Ok(values
        .iter()
        .map(Param::from_value)
        .collect::<Result<_, _>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(params: Vec<Param>) -> Vec<String> {
        params.iter().map(|p| p.raw().to_owned()).collect()
    }

    #[test]
    fn tuples_give_one_param_per_element() {
        assert_eq!(raw(positional((1, "two")).unwrap()), ["1", r#""two""#]);
        assert_eq!(raw(positional((vec![1, 2],)).unwrap()), ["[1,2]"]);
        assert!(positional(()).unwrap().is_empty());
    }

    #[test]
    fn bare_sequences_and_null_are_spread() {
        assert_eq!(raw(positional(vec![1, 2]).unwrap()), ["1", "2"]);
        assert!(positional(None::<i64>).unwrap().is_empty());
        assert_eq!(raw(positional(7).unwrap()), ["7"]);
    }
}
