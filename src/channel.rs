//! Length-delimited, bincode-framed duplex channel over TCP. The two halves
//! own their side of the socket, so a channel can be held in a cache and
//! serve several request/response exchanges over its lifetime.
use futures::prelude::*;
use futures_util::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio_serde::formats::*;
use tokio_serde::Framed;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

#[derive(Debug)]
pub enum Error {
    IO(std::io::Error),
    Closed,
}

pub type Reader<I, O> =
    Framed<FramedRead<OwnedReadHalf, LengthDelimitedCodec>, O, I, Bincode<O, I>>;

pub type Writer<I, O> =
    Framed<FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>, O, I, Bincode<O, I>>;

pub struct Receiver<I, O> {
    reader: Reader<I, O>,
}

impl<I, O> Receiver<I, O>
where
    I: for<'de> Deserialize<'de> + Serialize,
    O: for<'de> Deserialize<'de> + Serialize,
    Reader<I, O>: TryStream<Ok = O, Error = std::io::Error> + Unpin,
{
    /// Receives the next item, or `None` once the remote end has shut the
    /// connection down.
    pub async fn recv(&mut self) -> Result<Option<O>, Error> {
        Ok(self.reader.try_next().await.map_err(Error::IO)?)
    }
}

pub struct Sender<I, O> {
    writer: Writer<I, O>,
}

impl<I, O> Sender<I, O>
where
    I: for<'de> Deserialize<'de> + Serialize,
    O: for<'de> Deserialize<'de> + Serialize,
    Writer<I, O>: Sink<I, Error = std::io::Error> + Unpin,
{
    pub async fn send(&mut self, item: I) -> Result<(), Error> {
        Ok(self.writer.send(item).await.map_err(Error::IO)?)
    }
}

pub struct Channel<I, O> {
    socket: TcpStream,
    ghost: std::marker::PhantomData<(I, O)>,
}

impl<I, O> Channel<I, O>
where
    I: for<'de> Deserialize<'de> + Serialize,
    O: for<'de> Deserialize<'de> + Serialize,
{
    pub async fn connect(address: &SocketAddr) -> Result<Channel<I, O>, Error> {
        let socket = TcpStream::connect(&address).await.map_err(Error::IO)?;
        Ok(Channel { socket, ghost: Default::default() })
    }

    pub async fn accept(listener: &TcpListener) -> Result<Channel<I, O>, Error> {
        let (socket, _) = listener.accept().await.map_err(Error::IO)?;
        Ok(Channel { socket, ghost: Default::default() })
    }

    pub fn split(self) -> (Sender<I, O>, Receiver<I, O>) {
        let (read_half, write_half) = self.socket.into_split();

        let reader: FramedRead<OwnedReadHalf, LengthDelimitedCodec> =
            FramedRead::new(read_half, LengthDelimitedCodec::new());
        let reader = Framed::new(reader, Bincode::default());

        let writer: FramedWrite<OwnedWriteHalf, LengthDelimitedCodec> =
            FramedWrite::new(write_half, LengthDelimitedCodec::new());
        let writer = Framed::new(writer, Bincode::default());

        (Sender { writer }, Receiver { reader })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[derive(Debug, PartialEq, Deserialize, Serialize)]
    pub struct Ask(String);
    #[derive(Debug, PartialEq, Deserialize, Serialize)]
    pub struct Reply(String);

    #[actix_rt::test]
    async fn owned_halves_send_recv() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let channel: Channel<Reply, Ask> = Channel::accept(&listener)
                .await
                .expect("failed to accept connection");
            let (mut sender, mut receiver) = channel.split();

            // The accepting side answers two requests over one connection.
            for _ in 0..2u8 {
                let msg = receiver.recv().await.unwrap().unwrap();
                sender.send(Reply(msg.0.chars().rev().collect())).await.unwrap();
            }
        });

        let channel: Channel<Ask, Reply> = Channel::connect(&address)
            .await
            .expect("failed to connect");
        let (mut sender, mut receiver) = channel.split();

        sender.send(Ask(String::from("123"))).await.unwrap();
        let msg = receiver.recv().await.unwrap();
        assert_eq!(msg, Some(Reply(String::from("321"))));

        sender.send(Ask(String::from("456"))).await.unwrap();
        let msg = receiver.recv().await.unwrap();
        assert_eq!(msg, Some(Reply(String::from("654"))));

        handle.await.unwrap();
    }

    #[actix_rt::test]
    async fn recv_returns_none_on_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let channel: Channel<Reply, Ask> = Channel::accept(&listener).await.unwrap();
            // Accept and immediately drop both halves.
            let (_sender, _receiver) = channel.split();
        });

        let channel: Channel<Ask, Reply> = Channel::connect(&address).await.unwrap();
        let (_sender, mut receiver) = channel.split();
        handle.await.unwrap();

        let msg = receiver.recv().await.unwrap();
        assert_eq!(msg, None);
    }
}
