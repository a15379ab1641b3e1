/*
 * Copyright Stalwart Labs Ltd. See the COPYING
 * file at the top-level directory of this distribution.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::Instant;

use crate::{
    backoff::SingleAttempt,
    mime,
    smtp::{stream::MailStream, Stage},
    Backoff, ConnPool, Context, Error, Message, SendConfig, SmtpClient, SmtpClientBuilder,
};

use self::config::SmtpConfig;

pub mod config;

/// An SMTP session ready to accept envelopes.
pub type SmtpConnection = SmtpClient<MailStream>;

/// Delivers messages to a single SMTP server.
pub struct Mailer {
    config: SmtpConfig,
    builder: Arc<SmtpClientBuilder>,
    pool: Option<Arc<ConnPool<SmtpConnection>>>,
}

impl Mailer {
    /// Creates a mailer. A connection pool is set up when the
    /// configuration keeps idle connections.
    pub fn new(config: SmtpConfig) -> Self {
        let builder = Arc::new(config.to_builder());
        let pool = (config.pool_max_idle > 0).then(|| {
            Arc::new(smtp_pool(
                builder.clone(),
                config.pool_max_idle,
                config.pool_idle_ttl,
            ))
        });
        Mailer {
            config,
            builder,
            pool,
        }
    }

    pub fn config(&self) -> &SmtpConfig {
        &self.config
    }

    /// The mailer's own connection pool, if pooling is enabled.
    pub fn pool(&self) -> Option<Arc<ConnPool<SmtpConnection>>> {
        self.pool.clone()
    }

    /// Opens a new session, ready for an envelope.
    pub async fn connect(&self) -> crate::Result<SmtpConnection> {
        self.builder.connect().await
    }

    /// Builds and delivers a message.
    ///
    /// The payload is built once. Delivery is attempted following the
    /// configured backoff (a single attempt by default); only transient
    /// failures are retried. Connections come from the pool in `config`,
    /// or from the mailer's own pool, or are opened for the attempt and
    /// closed afterwards.
    pub async fn send(
        &self,
        context: &Context,
        message: Message,
        config: SendConfig,
    ) -> crate::Result<()> {
        let mut context = context.clone();
        if let Some(limiter) = &config.rate_limit {
            context
                .run(async {
                    limiter.wait().await;
                    Ok(())
                })
                .await?;
        }

        let mail_from = message.from.email.trim().to_string();
        let rcpt_to = message.recipients().map(str::to_string).collect::<Vec<_>>();
        let payload = mime::build(&mut context, message, &config)?;

        let backoff: &dyn Backoff = config.backoff.as_deref().unwrap_or(&SingleAttempt);
        let pool = config.pool.as_deref().or(self.pool.as_deref());
        let hooks = config.hooks.as_deref();
        let mut last_error = None;
        let mut attempt = 0;

        loop {
            if let Some(hooks) = hooks {
                hooks.attempt_start(&mut context, attempt);
            }

            let Some(delay) = backoff.next(attempt) else {
                let err = Error::Exhausted {
                    attempts: attempt,
                    last: last_error.map(Box::new),
                };
                if let Some(hooks) = hooks {
                    hooks.attempt_done(&context, attempt, Some(&err));
                }
                return Err(err);
            };

            if !delay.is_zero() {
                log::debug!("Waiting {delay:?} before delivery attempt {attempt}");
                if let Err(err) = context.sleep(delay).await {
                    if let Some(hooks) = hooks {
                        hooks.attempt_done(&context, attempt, Some(&err));
                    }
                    return Err(err);
                }
            }

            log::debug!(
                "Delivering message to {} recipient(s) via {} (attempt {attempt})",
                rcpt_to.len(),
                self.builder.addr
            );
            let result = self
                .try_send(&context, pool, &mail_from, &rcpt_to, &payload)
                .await;
            if let Some(hooks) = hooks {
                hooks.attempt_done(&context, attempt, result.as_ref().err());
            }

            match result {
                Ok(()) => return Ok(()),
                Err(err) if err.is_transient() && context.err().is_none() => {
                    log::debug!("Delivery attempt {attempt} failed: {err}");
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
            attempt += 1;
        }
    }

    async fn try_send(
        &self,
        context: &Context,
        pool: Option<&ConnPool<SmtpConnection>>,
        mail_from: &str,
        rcpt_to: &[String],
        payload: &[u8],
    ) -> crate::Result<()> {
        let deadline = context.deadline().or_else(|| {
            (!self.config.timeout.is_zero()).then(|| Instant::now() + self.config.timeout)
        });
        let recipients = || rcpt_to.iter().map(String::as_str);

        let mut pooled = None;
        if let Some(pool) = pool {
            if let Some(conn) = within(context, deadline, pool.acquire()).await? {
                pooled = Some((conn, pool));
            }
        }

        match pooled {
            Some((mut conn, pool)) => {
                let result = within(context, deadline, async {
                    conn.rset().await.map_err(Error::at(Stage::Reset))?;
                    conn.send_envelope(mail_from, recipients(), payload).await
                })
                .await;
                match &result {
                    Ok(()) => pool.release(conn).await,
                    Err(_) => pool.discard(conn),
                }
                result
            }
            None => {
                let mut conn = within(context, deadline, self.builder.connect()).await?;
                log::trace!(
                    "Connected to {} (tls: {})",
                    self.builder.addr,
                    conn.stream.is_tls()
                );
                within(
                    context,
                    deadline,
                    conn.send_envelope(mail_from, recipients(), payload),
                )
                .await?;
                if let Err(err) = conn.quit().await {
                    log::debug!("Failed to close connection to {}: {err}", self.builder.addr);
                }
                Ok(())
            }
        }
    }
}

/// Runs `future` until the context finishes or `deadline` passes.
async fn within<T>(
    context: &Context,
    deadline: Option<Instant>,
    future: impl Future<Output = crate::Result<T>>,
) -> crate::Result<T> {
    context
        .run(async move {
            match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, future)
                    .await
                    .map_err(|_| Error::Timeout)?,
                None => future.await,
            }
        })
        .await
}

/// A pool that opens sessions with `builder`, probes idle sessions with
/// NOOP and closes them with QUIT.
pub fn smtp_pool(
    builder: Arc<SmtpClientBuilder>,
    max_idle: usize,
    idle_ttl: Duration,
) -> ConnPool<SmtpConnection> {
    ConnPool::<SmtpConnection>::new(max_idle, idle_ttl)
        .create(move || {
            let builder = builder.clone();
            Box::pin(async move {
                log::debug!("Opening pooled connection to {}", builder.addr);
                builder.connect().await
            })
        })
        .close(|conn: SmtpConnection| Box::pin(conn.quit()))
        .health_check(|conn: &mut SmtpConnection| {
            Box::pin(async move { conn.noop().await.is_ok() })
        })
}

#[cfg(test)]
mod test {
    use std::{
        collections::VecDeque,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
        time::Duration,
    };

    use tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        net::{TcpListener, TcpStream},
    };

    use crate::{
        smtp::Stage, Context, Error, ExponentialBackoff, Hooks, Jitter, Mailer, Message,
        SendConfig, SmtpConfig, TokenBucket,
    };

    /// Scripted SMTP server. Replies to RCPT TO and to the end of DATA
    /// are taken from the queues, then default to success.
    #[derive(Default)]
    struct MockSmtp {
        auth: bool,
        starttls: bool,
        stall_data: bool,
        rcpt_replies: Mutex<VecDeque<&'static str>>,
        data_replies: Mutex<VecDeque<&'static str>>,
        log: Mutex<Vec<String>>,
        messages: Mutex<Vec<String>>,
        connections: AtomicUsize,
    }

    fn next_reply(queue: &Mutex<VecDeque<&'static str>>, default: &'static str) -> String {
        queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(default)
            .to_string()
    }

    impl MockSmtp {
        fn rcpt_replies(self, replies: &[&'static str]) -> Self {
            self.rcpt_replies.lock().unwrap().extend(replies);
            self
        }

        fn data_replies(self, replies: &[&'static str]) -> Self {
            self.data_replies.lock().unwrap().extend(replies);
            self
        }

        async fn start(self) -> (Arc<Self>, u16) {
            let mock = Arc::new(self);
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = listener.local_addr().unwrap().port();
            let server = mock.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    server.connections.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(server.clone().session(stream));
                }
            });
            (mock, port)
        }

        async fn session(self: Arc<Self>, stream: TcpStream) -> std::io::Result<()> {
            let (reader, mut writer) = stream.into_split();
            let mut lines = BufReader::new(reader).lines();
            writer.write_all(b"220 mock.test ESMTP ready\r\n").await?;

            while let Some(line) = lines.next_line().await? {
                self.log.lock().unwrap().push(line.clone());
                let verb = line
                    .split(' ')
                    .next()
                    .unwrap_or_default()
                    .to_ascii_uppercase();
                let reply = match verb.as_str() {
                    "EHLO" => {
                        let mut reply = String::from("250-mock.test\r\n");
                        if self.starttls {
                            reply.push_str("250-STARTTLS\r\n");
                        }
                        if self.auth {
                            reply.push_str("250-AUTH PLAIN\r\n");
                        }
                        reply.push_str("250 8BITMIME");
                        reply
                    }
                    "STARTTLS" => {
                        // Accepts the upgrade, then answers the handshake
                        // with plaintext and hangs up.
                        writer.write_all(b"220 2.0.0 Ready to start TLS\r\n").await?;
                        writer.write_all(b"not a tls server\r\n").await?;
                        return Ok(());
                    }
                    "AUTH" => "235 2.7.0 Authentication successful".to_string(),
                    "MAIL" => "250 2.1.0 OK".to_string(),
                    "RCPT" => next_reply(&self.rcpt_replies, "250 2.1.5 OK"),
                    "DATA" => {
                        writer.write_all(b"354 Start mail input\r\n").await?;
                        let mut message = String::new();
                        while let Some(line) = lines.next_line().await? {
                            if line == "." {
                                break;
                            }
                            message.push_str(line.strip_prefix('.').unwrap_or(&line));
                            message.push_str("\r\n");
                        }
                        self.messages.lock().unwrap().push(message);
                        if self.stall_data {
                            std::future::pending::<()>().await;
                        }
                        next_reply(&self.data_replies, "250 2.0.0 Queued")
                    }
                    "QUIT" => {
                        writer.write_all(b"221 2.0.0 Bye\r\n").await?;
                        return Ok(());
                    }
                    _ => "250 2.0.0 OK".to_string(),
                };
                writer.write_all(format!("{reply}\r\n").as_bytes()).await?;
            }
            Ok(())
        }

        fn commands(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        fn count(&self, verb: &str) -> usize {
            self.commands()
                .iter()
                .filter(|command| command.starts_with(verb))
                .count()
        }
    }

    fn server_config(port: u16) -> SmtpConfig {
        let _ = env_logger::builder().is_test(true).try_init();
        SmtpConfig::new("127.0.0.1", port).helo_host("client.test")
    }

    fn message() -> Message {
        Message::new("sender@example.com")
            .to("to@example.com")
            .cc("cc@example.com")
            .bcc("bcc@example.com")
            .subject("Hello")
            .text_body("Hello world\n.leading dot\n")
    }

    fn retry(attempts: u32, base: Duration) -> ExponentialBackoff {
        ExponentialBackoff::new(attempts, base, Duration::ZERO, Jitter::None)
    }

    /// Hooks counting attempt starts and failed attempts.
    fn counting_hooks() -> (Arc<Hooks>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let started = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));
        let hooks = Hooks::new()
            .on_attempt_start({
                let started = started.clone();
                move |_, _| {
                    started.fetch_add(1, Ordering::SeqCst);
                    None
                }
            })
            .on_attempt_done({
                let failed = failed.clone();
                move |_, _, err| {
                    if err.is_some() {
                        failed.fetch_add(1, Ordering::SeqCst);
                    }
                }
            });
        (Arc::new(hooks), started, failed)
    }

    #[tokio::test]
    async fn send_message() {
        let (mock, port) = MockSmtp::default().start().await;
        Mailer::new(server_config(port))
            .send(&Context::new(), message(), SendConfig::new())
            .await
            .unwrap();

        assert_eq!(
            mock.commands(),
            [
                "EHLO client.test",
                "MAIL FROM:<sender@example.com>",
                "RCPT TO:<to@example.com>",
                "RCPT TO:<cc@example.com>",
                "RCPT TO:<bcc@example.com>",
                "DATA",
                "QUIT"
            ]
        );

        let messages = mock.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("\r\nSubject: Hello\r\n"), "{}", messages[0]);
        assert!(messages[0].contains("\r\nCc: cc@example.com\r\n"));
        assert!(!messages[0].contains("bcc@example.com"));
        assert!(messages[0].ends_with("\r\n\r\nHello world\r\n.leading dot\r\n\r\n"));
    }

    #[tokio::test]
    async fn send_permanent_failure() {
        let (mock, port) = MockSmtp::default()
            .rcpt_replies(&["250 2.1.5 OK", "550 5.1.1 User unknown"])
            .start()
            .await;
        let (hooks, started, failed) = counting_hooks();

        let err = Mailer::new(server_config(port))
            .send(
                &Context::new(),
                message(),
                SendConfig::new()
                    .with_retry(retry(3, Duration::from_millis(10)))
                    .with_hooks(hooks),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Command {
                stage: Stage::RcptTo,
                ..
            }
        ));
        assert!(matches!(err.root_cause(), Error::UnexpectedReply(reply) if reply.code == 550));
        assert_eq!(mock.connections.load(Ordering::SeqCst), 1);
        assert_eq!(mock.count("DATA"), 0);
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(failed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn send_transient_failure_retried() {
        let (mock, port) = MockSmtp::default()
            .data_replies(&["451 4.3.0 Try again later"])
            .start()
            .await;
        let (hooks, started, failed) = counting_hooks();

        Mailer::new(server_config(port))
            .send(
                &Context::new(),
                message(),
                SendConfig::new()
                    .with_retry(retry(3, Duration::from_millis(10)))
                    .with_hooks(hooks),
            )
            .await
            .unwrap();

        assert_eq!(mock.connections.load(Ordering::SeqCst), 2);
        assert_eq!(mock.messages.lock().unwrap().len(), 2);
        assert_eq!(started.load(Ordering::SeqCst), 2);
        assert_eq!(failed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn send_attempts_exhausted() {
        let (mock, port) = MockSmtp::default()
            .rcpt_replies(&["421 4.7.0 Busy", "421 4.7.0 Busy"])
            .start()
            .await;
        let (hooks, started, failed) = counting_hooks();

        let err = Mailer::new(server_config(port))
            .send(
                &Context::new(),
                message(),
                SendConfig::new()
                    .with_retry(retry(2, Duration::from_millis(10)))
                    .with_hooks(hooks),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Exhausted { attempts: 2, last: Some(_) }), "{err}");
        assert!(matches!(err.root_cause(), Error::UnexpectedReply(reply) if reply.code == 421));
        assert_eq!(mock.connections.load(Ordering::SeqCst), 2);
        assert_eq!(started.load(Ordering::SeqCst), 3);
        assert_eq!(failed.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn send_cancelled_during_backoff() {
        let (mock, port) = MockSmtp::default()
            .rcpt_replies(&["421 4.7.0 Busy"])
            .start()
            .await;
        let context = Context::new();
        let canceller = context.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let start = std::time::Instant::now();
        let err = Mailer::new(server_config(port))
            .send(
                &context,
                message(),
                SendConfig::new().with_retry(retry(3, Duration::from_secs(30))),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled), "{err}");
        assert!(start.elapsed() < Duration::from_secs(10));
        assert_eq!(mock.connections.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn send_timeout() {
        let (_mock, port) = MockSmtp {
            stall_data: true,
            ..Default::default()
        }
        .start()
        .await;

        let err = Mailer::new(server_config(port).timeout(Duration::from_millis(200)))
            .send(&Context::new(), message(), SendConfig::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Exhausted { attempts: 1, .. }), "{err}");
        assert!(matches!(err.root_cause(), Error::Timeout), "{err}");
    }

    #[tokio::test]
    async fn send_pooled() {
        let (mock, port) = MockSmtp::default().start().await;
        let mailer = Mailer::new(server_config(port).pool(2, Duration::from_secs(30)));
        let pool = mailer.pool().unwrap();

        for _ in 0..2 {
            mailer
                .send(&Context::new(), message(), SendConfig::new())
                .await
                .unwrap();
        }

        assert_eq!(mock.connections.load(Ordering::SeqCst), 1);
        assert_eq!(mock.count("MAIL FROM"), 2);
        assert_eq!(mock.count("RSET"), 2);
        assert_eq!(mock.count("NOOP"), 1);
        assert_eq!(mock.count("QUIT"), 0);
        assert_eq!((pool.in_use(), pool.idle()), (0, 1));

        // An explicit pool takes precedence over the mailer's own.
        let other = Arc::new(crate::transport::smtp_pool(
            Arc::new(mailer.config().to_builder()),
            1,
            Duration::ZERO,
        ));
        mailer
            .send(&Context::new(), message(), SendConfig::new().with_pool(other.clone()))
            .await
            .unwrap();
        assert_eq!(mock.connections.load(Ordering::SeqCst), 2);
        assert_eq!(other.idle(), 1);

        pool.drain().await;
        other.drain().await;
        assert_eq!(mock.count("QUIT"), 2);
    }

    #[tokio::test]
    async fn send_authenticated() {
        let (mock, port) = MockSmtp {
            auth: true,
            ..Default::default()
        }
        .start()
        .await;

        Mailer::new(server_config(port).credentials("user", "pass"))
            .send(&Context::new(), message(), SendConfig::new())
            .await
            .unwrap();

        assert_eq!(mock.commands()[1], "AUTH PLAIN AHVzZXIAcGFzcw==");
    }

    #[tokio::test]
    async fn send_invalid_message() {
        let (mock, port) = MockSmtp::default().start().await;
        let err = Mailer::new(server_config(port))
            .send(
                &Context::new(),
                Message::new("sender@example.com").text_body("hi"),
                SendConfig::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::MissingRcptTo));
        assert_eq!(mock.connections.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn send_starttls_offered() {
        let (mock, port) = MockSmtp {
            starttls: true,
            ..Default::default()
        }
        .start()
        .await;

        let err = Mailer::new(
            server_config(port)
                .start_tls(true)
                .timeout(Duration::from_secs(5)),
        )
        .send(&Context::new(), message(), SendConfig::new())
        .await
        .unwrap_err();

        // A dropped handshake is transient, so the single attempt ends
        // up wrapped as exhausted.
        let err = match err {
            Error::Exhausted { last: Some(last), .. } => *last,
            err => err,
        };
        assert!(
            matches!(err, Error::Command { stage: Stage::StartTls, .. }),
            "{err}"
        );
        assert_eq!(mock.count("STARTTLS"), 1);
        assert_eq!(mock.count("MAIL FROM"), 0);
    }

    #[tokio::test]
    async fn send_starttls_not_offered() {
        let (mock, port) = MockSmtp::default().start().await;

        Mailer::new(server_config(port).start_tls(true))
            .send(&Context::new(), message(), SendConfig::new())
            .await
            .unwrap();

        assert_eq!(mock.count("STARTTLS"), 0);
        assert_eq!(mock.count("EHLO"), 1);
        assert_eq!(mock.messages.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn send_auth_not_advertised() {
        let (mock, port) = MockSmtp::default().start().await;

        Mailer::new(server_config(port).credentials("user", "pass"))
            .send(&Context::new(), message(), SendConfig::new())
            .await
            .unwrap();

        assert_eq!(mock.count("AUTH"), 0);
        assert_eq!(mock.commands()[1], "MAIL FROM:<sender@example.com>");
    }

    #[tokio::test]
    async fn send_rate_limited() {
        let (mock, port) = MockSmtp::default().start().await;
        let mailer = Mailer::new(server_config(port));
        let limiter = Arc::new(TokenBucket::new(5.0, 1));
        let config = || SendConfig::new().with_rate_limit(limiter.clone());

        let start = std::time::Instant::now();
        for _ in 0..2 {
            mailer.send(&Context::new(), message(), config()).await.unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(150));
        assert_eq!(mock.messages.lock().unwrap().len(), 2);

        // Cancelled while waiting for a token.
        let slow = Arc::new(TokenBucket::new(0.1, 1));
        assert!(slow.try_acquire());
        let context = Context::new();
        let canceller = context.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });
        let start = std::time::Instant::now();
        let err = mailer
            .send(&context, message(), SendConfig::new().with_rate_limit(slow))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled), "{err}");
        assert!(start.elapsed() < Duration::from_secs(5));

        // An already cancelled context never reaches the server.
        let err = mailer
            .send(&context, message(), config())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled), "{err}");
        assert_eq!(mock.connections.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn send_rejects_injected_recipient() {
        let (mock, port) = MockSmtp::default().start().await;
        let err = Mailer::new(server_config(port))
            .send(
                &Context::new(),
                Message::new("sender@example.com")
                    .to("to@example.com>\r\nRCPT TO:<evil@attacker.test")
                    .text_body("hi"),
                SendConfig::new().with_retry(retry(3, Duration::from_millis(10))),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidAddress(_)), "{err}");
        assert_eq!(mock.connections.load(Ordering::SeqCst), 0);
    }
}
