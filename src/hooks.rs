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

use std::fmt::Debug;

use crate::{Context, Error, Message};

type BuildStartFn = Box<dyn Fn(&Context, &Message) -> Option<Context> + Send + Sync>;
type BuildDoneFn = Box<dyn Fn(&Context, &Message, usize, Option<&Error>) + Send + Sync>;
type AttemptStartFn = Box<dyn Fn(&Context, u32) -> Option<Context> + Send + Sync>;
type AttemptDoneFn = Box<dyn Fn(&Context, u32, Option<&Error>) + Send + Sync>;

/// Observability callbacks. Every callback is optional and only invoked
/// when set. The start callbacks may return a replacement context that is
/// used for the rest of the send.
#[derive(Default)]
pub struct Hooks {
    on_build_start: Option<BuildStartFn>,
    on_build_done: Option<BuildDoneFn>,
    on_attempt_start: Option<AttemptStartFn>,
    on_attempt_done: Option<AttemptDoneFn>,
}

impl Hooks {
    pub fn new() -> Self {
        Hooks::default()
    }

    /// Called with the message before the payload is built.
    pub fn on_build_start(
        mut self,
        hook: impl Fn(&Context, &Message) -> Option<Context> + Send + Sync + 'static,
    ) -> Self {
        self.on_build_start = Some(Box::new(hook));
        self
    }

    /// Called after the build with the payload size, or the error.
    pub fn on_build_done(
        mut self,
        hook: impl Fn(&Context, &Message, usize, Option<&Error>) + Send + Sync + 'static,
    ) -> Self {
        self.on_build_done = Some(Box::new(hook));
        self
    }

    /// Called before each delivery attempt (0-based).
    pub fn on_attempt_start(
        mut self,
        hook: impl Fn(&Context, u32) -> Option<Context> + Send + Sync + 'static,
    ) -> Self {
        self.on_attempt_start = Some(Box::new(hook));
        self
    }

    /// Called when a delivery attempt finishes.
    pub fn on_attempt_done(
        mut self,
        hook: impl Fn(&Context, u32, Option<&Error>) + Send + Sync + 'static,
    ) -> Self {
        self.on_attempt_done = Some(Box::new(hook));
        self
    }

    pub(crate) fn build_start(&self, context: &mut Context, message: &Message) {
        if let Some(hook) = &self.on_build_start {
            if let Some(replacement) = hook(context, message) {
                *context = replacement;
            }
        }
    }

    pub(crate) fn build_done(
        &self,
        context: &Context,
        message: &Message,
        size: usize,
        err: Option<&Error>,
    ) {
        if let Some(hook) = &self.on_build_done {
            hook(context, message, size, err);
        }
    }

    pub(crate) fn attempt_start(&self, context: &mut Context, attempt: u32) {
        if let Some(hook) = &self.on_attempt_start {
            if let Some(replacement) = hook(context, attempt) {
                *context = replacement;
            }
        }
    }

    pub(crate) fn attempt_done(&self, context: &Context, attempt: u32, err: Option<&Error>) {
        if let Some(hook) = &self.on_attempt_done {
            hook(context, attempt, err);
        }
    }
}

impl Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("on_build_start", &self.on_build_start.is_some())
            .field("on_build_done", &self.on_build_done.is_some())
            .field("on_attempt_start", &self.on_attempt_start.is_some())
            .field("on_attempt_done", &self.on_attempt_done.is_some())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use crate::{Context, Error, Hooks, Message};

    #[test]
    fn hooks_invoked_when_set() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let failures = Arc::new(AtomicUsize::new(0));
        let hooks = Hooks::new()
            .on_attempt_start({
                let attempts = attempts.clone();
                move |context, attempt| {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    (attempt == 1).then(|| context.clone().with_timeout(Duration::from_secs(5)))
                }
            })
            .on_attempt_done({
                let failures = failures.clone();
                move |_, _, err| {
                    if err.is_some() {
                        failures.fetch_add(1, Ordering::SeqCst);
                    }
                }
            });

        let mut context = Context::new();
        hooks.attempt_start(&mut context, 0);
        assert!(context.deadline().is_none());
        hooks.attempt_done(&context, 0, Some(&Error::Timeout));
        hooks.attempt_start(&mut context, 1);
        assert!(context.deadline().is_some());
        hooks.attempt_done(&context, 1, None);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(failures.load(Ordering::SeqCst), 1);

        // Unset callbacks are skipped.
        let message = Message::new("a@example.com");
        hooks.build_start(&mut context, &message);
        hooks.build_done(&context, &message, 10, None);
        assert_eq!(
            format!("{hooks:?}"),
            "Hooks { on_build_start: false, on_build_done: false, on_attempt_start: true, on_attempt_done: true }"
        );
    }
}
