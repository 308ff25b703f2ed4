//! In-memory stream replaying a scripted server

use std::{
    io::{self, Cursor, Read, Write},
    sync::{Arc, Mutex},
};

use super::{Dialer, NetworkStream, TlsConfig};
use crate::{dsn::Network, Context};

type MockCursor = Cursor<Vec<u8>>;

/// Reads the replies it was built with, records what the client writes
#[derive(Clone, Debug)]
pub(crate) struct MockStream {
    reader: Arc<Mutex<MockCursor>>,
    writer: Arc<Mutex<Vec<u8>>>,
}

impl MockStream {
    pub(crate) fn with_replies(replies: &str) -> MockStream {
        MockStream {
            reader: Arc::new(Mutex::new(MockCursor::new(replies.as_bytes().to_vec()))),
            writer: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Everything written so far
    pub(crate) fn written(&self) -> String {
        String::from_utf8(self.writer.lock().unwrap().clone()).unwrap()
    }

    pub(crate) fn network_stream(&self) -> NetworkStream {
        NetworkStream::custom(Box::new(self.clone()))
    }
}

impl Write for MockStream {
    fn write(&mut self, msg: &[u8]) -> io::Result<usize> {
        self.writer.lock().unwrap().write(msg)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.lock().unwrap().read(buf)
    }
}

/// Hands out one [`MockStream`] and records how it was asked for
#[derive(Debug)]
pub(crate) struct MockDialer {
    pub(crate) stream: MockStream,
    pub(crate) dials: Mutex<Vec<(Network, String, Option<TlsConfig>)>>,
}

impl MockDialer {
    pub(crate) fn new(replies: &str) -> MockDialer {
        MockDialer {
            stream: MockStream::with_replies(replies),
            dials: Mutex::new(Vec::new()),
        }
    }
}

impl Dialer for MockDialer {
    fn dial(
        &self,
        _ctx: &Context,
        network: Network,
        address: &str,
        tls: Option<&TlsConfig>,
    ) -> io::Result<NetworkStream> {
        self.dials
            .lock()
            .unwrap()
            .push((network, address.to_owned(), tls.cloned()));
        Ok(self.stream.network_stream())
    }

    fn upgrade(
        &self,
        _stream: &mut NetworkStream,
        _tls: &TlsConfig,
        _domain: &str,
    ) -> io::Result<()> {
        // the script goes on in plaintext
        Ok(())
    }
}
