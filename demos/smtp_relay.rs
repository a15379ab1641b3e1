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

use std::{sync::Arc, time::Duration};

use mail_dispatch::{
    Context, ExponentialBackoff, Jitter, Mailer, Message, SendConfig, SmtpConfig, TokenBucket,
};

#[tokio::main]
async fn main() {
    // Relay through a submission server using STARTTLS, keeping up to two
    // sessions open between sends.
    let mailer = Mailer::new(
        SmtpConfig::new("smtp.example.com", 587)
            .credentials("john", "p4ssw0rd")
            .start_tls(true)
            .pool(2, Duration::from_secs(30)),
    );

    // At most 5 messages per second, bursting up to 10.
    let limiter = Arc::new(TokenBucket::new(5.0, 10));

    for recipient in ["jane@example.com", "james@example.com"] {
        let message = Message::new("john@example.com")
            .to(recipient)
            .subject("Howdy!")
            .text_body("These pretzels are making me thirsty.")
            .html_body("<p>These pretzels are making me <b>thirsty</b>.</p>");

        // Retry transient failures up to three times, giving up after a minute.
        mailer
            .send(
                &Context::new().with_timeout(Duration::from_secs(60)),
                message,
                SendConfig::new()
                    .with_retry(ExponentialBackoff::new(
                        3,
                        Duration::from_millis(500),
                        Duration::from_secs(5),
                        Jitter::Full,
                    ))
                    .with_rate_limit(limiter.clone()),
            )
            .await
            .unwrap();
    }

    if let Some(pool) = mailer.pool() {
        pool.drain().await;
    }
}
