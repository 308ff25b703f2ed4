//! Fake SMTP server and dialers shared by the integration tests

#![allow(dead_code)]

use std::{
    io::{self, BufRead, BufReader, Read, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard,
    },
    thread,
    time::{Duration, Instant},
};

use postern::{Context, Dialer, Network, NetworkStream, TlsConfig};

/// Prints the client logs of failing tests
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
        .with_test_writer()
        .try_init();
}

/// How the fake server answers
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// Extension lines advertised after the EHLO greeting line
    pub extensions: Vec<&'static str>,
    pub reject_mail: bool,
    /// Recipients answered with `550`
    pub reject_rcpt: Vec<&'static str>,
    pub reject_data: bool,
    /// Drop the connection right after answering `DATA`
    pub hang_up_after_data: bool,
    /// Pause before answering `NOOP`
    pub noop_delay: Option<Duration>,
}

/// Everything the fake server saw
#[derive(Debug, Default)]
pub struct Transcript {
    pub opened: usize,
    pub closed: usize,
    /// Sessions that have not sent `QUIT` yet
    pub live: usize,
    /// Highest `live` seen
    pub max_live: usize,
    /// Command lines, one list per session
    pub commands: Vec<Vec<String>>,
    /// Message contents as received, still dot-stuffed
    pub messages: Vec<String>,
}

/// SMTP server on a loopback port, one thread per session
#[derive(Debug, Clone)]
pub struct FakeServer {
    addr: SocketAddr,
    transcript: Arc<Mutex<Transcript>>,
}

impl FakeServer {
    pub fn start(script: Script) -> FakeServer {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let transcript = Arc::new(Mutex::new(Transcript::default()));

        let shared = Arc::clone(&transcript);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let script = script.clone();
                let transcript = Arc::clone(&shared);
                thread::spawn(move || serve(stream, &script, &transcript));
            }
        });

        FakeServer { addr, transcript }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// DSN reaching this server in plaintext
    pub fn dsn(&self) -> String {
        format!("tcp({})/", self.addr)
    }

    pub fn transcript(&self) -> MutexGuard<'_, Transcript> {
        self.transcript.lock().unwrap()
    }

    /// Waits for `sessions` sessions to be over on the server side
    pub fn wait_closed(&self, sessions: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.transcript().closed < sessions {
            assert!(
                Instant::now() < deadline,
                "sessions still open: {:?}",
                *self.transcript()
            );
            thread::sleep(Duration::from_millis(10));
        }
    }
}

/// Runs one session on `stream`
pub fn serve<S: Read + Write>(stream: S, script: &Script, transcript: &Mutex<Transcript>) {
    let session = {
        let mut transcript = transcript.lock().unwrap();
        transcript.opened += 1;
        transcript.live += 1;
        transcript.max_live = transcript.max_live.max(transcript.live);
        transcript.commands.push(Vec::new());
        transcript.commands.len() - 1
    };

    let mut stream = BufReader::new(stream);
    let mut quit = false;
    if let Err(err) = converse(&mut stream, script, transcript, session, &mut quit) {
        eprintln!("fake server: {err}");
    }

    let mut transcript = transcript.lock().unwrap();
    if !quit {
        transcript.live -= 1;
    }
    transcript.closed += 1;
}

fn converse<S: Read + Write>(
    stream: &mut BufReader<S>,
    script: &Script,
    transcript: &Mutex<Transcript>,
    session: usize,
    quit: &mut bool,
) -> io::Result<()> {
    reply(stream, "220 fake.local ESMTP ready")?;

    loop {
        let Some(command) = read_line(stream)? else {
            return Ok(());
        };
        let command = command.trim_end().to_owned();
        transcript.lock().unwrap().commands[session].push(command.clone());

        let verb = command
            .split([' ', ':'])
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();
        match verb.as_str() {
            "EHLO" => {
                let mut lines = vec!["fake.local"];
                lines.extend(script.extensions.iter().copied());
                for (idx, line) in lines.iter().enumerate() {
                    let separator = if idx + 1 == lines.len() { ' ' } else { '-' };
                    reply(stream, &format!("250{separator}{line}"))?;
                }
            }
            "NOOP" => {
                if let Some(delay) = script.noop_delay {
                    thread::sleep(delay);
                }
                reply(stream, "250 ok")?;
            }
            "HELO" | "RSET" => reply(stream, "250 ok")?,
            "STARTTLS" => reply(stream, "220 go ahead")?,
            "AUTH" => reply(stream, "235 authenticated")?,
            "MAIL" if script.reject_mail => reply(stream, "550 sender rejected")?,
            "RCPT"
                if script
                    .reject_rcpt
                    .iter()
                    .any(|rcpt| command.contains(&format!("<{rcpt}>"))) =>
            {
                reply(stream, "550 no such user")?;
            }
            "MAIL" | "RCPT" => reply(stream, "250 ok")?,
            "DATA" => {
                reply(stream, "354 end data with <CR><LF>.<CR><LF>")?;
                if script.hang_up_after_data {
                    return Ok(());
                }
                let mut message = String::new();
                loop {
                    let Some(line) = read_line(stream)? else {
                        return Ok(());
                    };
                    if line == ".\r\n" {
                        break;
                    }
                    message.push_str(&line);
                }
                transcript.lock().unwrap().messages.push(message);

                if script.reject_data {
                    reply(stream, "554 message rejected")?;
                } else {
                    reply(stream, "250 queued")?;
                }
            }
            "QUIT" => {
                // the client waits for the reply before its next dial
                *quit = true;
                transcript.lock().unwrap().live -= 1;
                reply(stream, "221 bye")?;
                return Ok(());
            }
            _ => reply(stream, "502 command not implemented")?,
        }
    }
}

fn read_line<S: Read>(stream: &mut BufReader<S>) -> io::Result<Option<String>> {
    let mut line = String::new();
    match stream.read_line(&mut line)? {
        0 => Ok(None),
        _ => Ok(Some(line)),
    }
}

fn reply<S: Read + Write>(stream: &mut BufReader<S>, line: &str) -> io::Result<()> {
    let stream = stream.get_mut();
    write!(stream, "{line}\r\n")?;
    stream.flush()
}

/// What a [`RecordingDialer`] was asked for
#[derive(Debug, Clone)]
pub struct Dial {
    pub network: Network,
    pub address: String,
    pub tls: Option<TlsConfig>,
}

/// Sends every dial to one TCP address and records it
///
/// `STARTTLS` upgrades are recorded and skipped, the session goes on in
/// plaintext.
#[derive(Debug, Clone)]
pub struct RecordingDialer {
    target: SocketAddr,
    count: Arc<AtomicUsize>,
    dials: Arc<Mutex<Vec<Dial>>>,
    upgrades: Arc<Mutex<Vec<(TlsConfig, String)>>>,
}

impl RecordingDialer {
    pub fn new(target: SocketAddr) -> RecordingDialer {
        RecordingDialer {
            target,
            count: Arc::new(AtomicUsize::new(0)),
            dials: Arc::new(Mutex::new(Vec::new())),
            upgrades: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn dials(&self) -> Vec<Dial> {
        self.dials.lock().unwrap().clone()
    }

    /// TLS settings and verified domain of each upgrade
    pub fn upgrades(&self) -> Vec<(TlsConfig, String)> {
        self.upgrades.lock().unwrap().clone()
    }
}

impl Dialer for RecordingDialer {
    fn dial(
        &self,
        _ctx: &Context,
        network: Network,
        address: &str,
        tls: Option<&TlsConfig>,
    ) -> io::Result<NetworkStream> {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.dials.lock().unwrap().push(Dial {
            network,
            address: address.to_owned(),
            tls: tls.cloned(),
        });
        TcpStream::connect(self.target).map(NetworkStream::tcp)
    }

    fn upgrade(
        &self,
        _stream: &mut NetworkStream,
        tls: &TlsConfig,
        domain: &str,
    ) -> io::Result<()> {
        self.upgrades
            .lock()
            .unwrap()
            .push((tls.clone(), domain.to_owned()));
        Ok(())
    }
}
