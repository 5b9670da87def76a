//! The driver talking real SMTP to an in-process server.

#![allow(clippy::unwrap_used, clippy::significant_drop_tightening)]

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use mailpipe_core::config::{HeaderConfig, MailboxConfig, RecipientConfig};
use mailpipe_core::{
    AckOutcome, AckTracker, CounterKind, DriverConfig, LogMessage, LogPipe, MessageId,
    PathOptions, RecipientKind, SmtpDriver,
};

/// One accepted connection: the lines the client sent.
type Session = Vec<String>;

/// Serves SMTP sessions until the test ends. The first `busy` connections
/// get a 421 greeting and are closed.
fn spawn_server(busy: usize) -> (u16, Arc<Mutex<Vec<Session>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let sessions = Arc::new(Mutex::new(Vec::new()));

    let recorded = sessions.clone();
    thread::spawn(move || {
        for (n, stream) in listener.incoming().enumerate() {
            let Ok(stream) = stream else { break };
            let transcript = if n < busy {
                refuse(stream)
            } else {
                serve(stream)
            };
            recorded.lock().unwrap().push(transcript);
        }
    });

    (port, sessions)
}

fn refuse(mut stream: TcpStream) -> Session {
    stream
        .write_all(b"421 mock.example.com busy, try later\r\n")
        .unwrap();
    Vec::new()
}

fn serve(stream: TcpStream) -> Session {
    let mut writer = stream.try_clone().unwrap();
    let mut reader = BufReader::new(stream);
    let mut transcript = Vec::new();
    let mut reply = |text: &str| writer.write_all(format!("{text}\r\n").as_bytes()).unwrap();

    reply("220 mock.example.com ESMTP");
    let mut in_data = false;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).unwrap_or(0) == 0 {
            break;
        }
        let line = line.trim_end_matches(['\r', '\n']).to_string();
        transcript.push(line.clone());

        if in_data {
            if line == "." {
                in_data = false;
                reply("250 2.0.0 queued as 1");
            }
            continue;
        }

        let verb = line.split(' ').next().unwrap_or("").to_ascii_uppercase();
        match verb.as_str() {
            "EHLO" => {
                reply("250-mock.example.com");
                reply("250-SIZE 1000000");
                reply("250 8BITMIME");
            }
            "MAIL" => reply("250 2.1.0 ok"),
            "RCPT" if line.contains("nobody@") => reply("550 5.1.1 no such user"),
            "RCPT" => reply("250 2.1.5 ok"),
            "DATA" => {
                in_data = true;
                reply("354 go ahead");
            }
            "QUIT" => {
                reply("221 bye");
                break;
            }
            _ => reply("502 5.5.2 not implemented"),
        }
    }
    transcript
}

#[derive(Default)]
struct Acks(Mutex<Vec<(MessageId, AckOutcome)>>);

impl AckTracker for Acks {
    fn register(&self, _id: MessageId) {}

    fn acknowledge(&self, id: MessageId, outcome: AckOutcome) {
        self.0.lock().unwrap().push((id, outcome));
    }
}

fn config(port: u16) -> DriverConfig {
    DriverConfig {
        port,
        helo_name: "logger.example.com".into(),
        from: MailboxConfig {
            phrase: Some("Syslog".into()),
            address: "syslog@example.com".into(),
        },
        recipients: vec![
            RecipientConfig {
                kind: RecipientKind::To,
                phrase: None,
                address: "ops@example.com".into(),
            },
            RecipientConfig {
                kind: RecipientKind::Bcc,
                phrase: None,
                address: "nobody@example.com".into(),
            },
            RecipientConfig {
                kind: RecipientKind::ReplyTo,
                phrase: None,
                address: "noc@example.com".into(),
            },
        ],
        subject: "alert from $HOST".into(),
        body: "$PROGRAM: $MSG\n.leading dot".into(),
        headers: vec![HeaderConfig {
            name: "X-Severity".into(),
            value: "$LEVEL".into(),
        }],
        time_reopen: 0.1,
        timeout: 5.0,
        ..DriverConfig::default()
    }
}

fn wait_until(cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not met in time");
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn delivers_rendered_message_over_smtp() {
    let (port, sessions) = spawn_server(0);
    let acks = Arc::new(Acks::default());
    let mut driver = SmtpDriver::new("d_mail", config(port)).unwrap();
    driver.init().unwrap();

    let msg = LogMessage::new("disk full")
        .with_host("web1")
        .with_program("kernel")
        .with_priority(0, 2);
    let id = msg.id();
    driver
        .enqueue(Arc::new(msg), &PathOptions::flow_controlled(acks.clone()))
        .unwrap();

    wait_until(|| !acks.0.lock().unwrap().is_empty());
    assert_eq!(*acks.0.lock().unwrap(), vec![(id, AckOutcome::Delivered)]);
    driver.deinit().unwrap();

    wait_until(|| sessions.lock().unwrap().len() == 1);
    let sessions = sessions.lock().unwrap();
    let session = &sessions[0];
    assert_eq!(session[0], "EHLO logger.example.com");
    assert!(session[1].starts_with("MAIL FROM:<syslog@example.com> SIZE="));
    assert_eq!(session[2], "RCPT TO:<ops@example.com>");
    assert_eq!(session[3], "RCPT TO:<nobody@example.com>");
    assert!(
        !session.iter().any(|l| l.starts_with("RCPT TO:<noc@")),
        "reply-to is not an envelope recipient"
    );

    assert!(session.contains(&"Subject: alert from web1".to_string()));
    assert!(session.contains(&"Reply-To: <noc@example.com>".to_string()));
    assert!(session.contains(&"X-Severity: crit".to_string()));
    assert!(session.iter().all(|l| !l.starts_with("Bcc:")));
    assert!(session.contains(&"kernel: disk full".to_string()));
    assert!(session.contains(&"..leading dot".to_string()), "dot-stuffed");
    assert_eq!(session.last().map(String::as_str), Some("QUIT"));

    let stored = driver.stats_key(CounterKind::Stored);
    assert_eq!(driver.stats().get(&stored), None, "unregistered after deinit");
}

#[test]
fn recovers_after_server_refuses_session() {
    let (port, sessions) = spawn_server(1);
    let acks = Arc::new(Acks::default());
    let mut driver = SmtpDriver::new("d_mail", config(port)).unwrap();
    driver.init().unwrap();

    let started = Instant::now();
    driver
        .enqueue(
            Arc::new(LogMessage::new("retry me")),
            &PathOptions::flow_controlled(acks.clone()),
        )
        .unwrap();

    wait_until(|| !acks.0.lock().unwrap().is_empty());
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(acks.0.lock().unwrap()[0].1, AckOutcome::Delivered);

    let stored = driver.stats_key(CounterKind::Stored);
    assert_eq!(driver.stats().get(&stored), Some(1));
    driver.deinit().unwrap();

    wait_until(|| sessions.lock().unwrap().len() == 2);
    let sessions = sessions.lock().unwrap();
    assert!(sessions[0].is_empty());
    assert!(sessions[1].iter().any(|l| l.ends_with("retry me")));
}
