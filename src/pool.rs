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

use std::{
    future::Future,
    pin::Pin,
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use tokio::time::Instant;

pub type BoxFuture<'x, T> = Pin<Box<dyn Future<Output = T> + Send + 'x>>;

type CreateFn<C> = Box<dyn Fn() -> BoxFuture<'static, crate::Result<C>> + Send + Sync>;
type CloseFn<C> = Box<dyn Fn(C) -> BoxFuture<'static, crate::Result<()>> + Send + Sync>;
type HealthFn<C> = Box<dyn for<'x> Fn(&'x mut C) -> BoxFuture<'x, bool> + Send + Sync>;

pub const DEFAULT_MAX_IDLE: usize = 2;
pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(30);

/// Cache of idle connections. The pool knows nothing about the
/// connection type: opening, closing and probing connections is
/// delegated to the functions it is built with. No I/O happens while the
/// internal lock is held.
pub struct ConnPool<C> {
    max_idle: usize,
    idle_ttl: Duration,
    create: Option<CreateFn<C>>,
    close: Option<CloseFn<C>>,
    health_check: Option<HealthFn<C>>,
    state: Mutex<PoolState<C>>,
}

struct PoolState<C> {
    idle: Vec<PoolItem<C>>,
    in_use: usize,
}

struct PoolItem<C> {
    conn: C,
    returned_at: Instant,
}

impl<C: Send + 'static> ConnPool<C> {
    /// Creates an empty pool. A zero `max_idle` or `idle_ttl` selects the
    /// defaults (2 connections, 30 seconds).
    pub fn new(max_idle: usize, idle_ttl: Duration) -> Self {
        ConnPool {
            max_idle: if max_idle > 0 {
                max_idle
            } else {
                DEFAULT_MAX_IDLE
            },
            idle_ttl: if !idle_ttl.is_zero() {
                idle_ttl
            } else {
                DEFAULT_IDLE_TTL
            },
            create: None,
            close: None,
            health_check: None,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                in_use: 0,
            }),
        }
    }

    /// Sets the function used to open new connections.
    pub fn create(
        mut self,
        create: impl Fn() -> BoxFuture<'static, crate::Result<C>> + Send + Sync + 'static,
    ) -> Self {
        self.create = Some(Box::new(create));
        self
    }

    /// Sets the function used to close connections leaving the pool.
    pub fn close(
        mut self,
        close: impl Fn(C) -> BoxFuture<'static, crate::Result<()>> + Send + Sync + 'static,
    ) -> Self {
        self.close = Some(Box::new(close));
        self
    }

    /// Sets the liveness probe run on idle connections before reuse.
    pub fn health_check(
        mut self,
        health_check: impl for<'x> Fn(&'x mut C) -> BoxFuture<'x, bool> + Send + Sync + 'static,
    ) -> Self {
        self.health_check = Some(Box::new(health_check));
        self
    }

    /// Returns the most recently released usable connection, or opens a
    /// new one. Idle connections past their TTL or failing the health
    /// check are closed on the way. Returns `None` when there is nothing
    /// to reuse and no create function.
    pub async fn acquire(&self) -> crate::Result<Option<C>> {
        loop {
            let item = self.lock().idle.pop();
            let Some(PoolItem {
                mut conn,
                returned_at,
            }) = item
            else {
                break;
            };

            if returned_at.elapsed() <= self.idle_ttl && self.is_healthy(&mut conn).await {
                self.lock().in_use += 1;
                log::trace!("Reusing pooled connection");
                return Ok(Some(conn));
            }

            log::debug!("Closing stale or unhealthy pooled connection");
            self.close_conn(conn).await;
        }

        match &self.create {
            Some(create) => {
                let conn = create().await?;
                self.lock().in_use += 1;
                Ok(Some(conn))
            }
            None => Ok(None),
        }
    }

    /// Returns a connection to idle storage, or closes it when the pool
    /// is full.
    pub async fn release(&self, conn: C) {
        let rejected = {
            let mut state = self.lock();
            state.in_use = state.in_use.saturating_sub(1);
            if state.idle.len() >= self.max_idle {
                Some(conn)
            } else {
                state.idle.push(PoolItem {
                    conn,
                    returned_at: Instant::now(),
                });
                None
            }
        };

        if let Some(conn) = rejected {
            self.close_conn(conn).await;
        }
    }

    /// Drops a broken checked out connection without running the close
    /// function.
    pub fn discard(&self, conn: C) {
        {
            let mut state = self.lock();
            state.in_use = state.in_use.saturating_sub(1);
        }
        drop(conn);
    }

    /// Closes every idle connection. Checked out connections are not
    /// affected.
    pub async fn drain(&self) {
        let idle = std::mem::take(&mut self.lock().idle);
        for item in idle {
            self.close_conn(item.conn).await;
        }
    }

    /// Number of connections currently checked out.
    pub fn in_use(&self) -> usize {
        self.lock().in_use
    }

    /// Number of idle connections.
    pub fn idle(&self) -> usize {
        self.lock().idle.len()
    }

    async fn is_healthy(&self, conn: &mut C) -> bool {
        match &self.health_check {
            Some(health_check) => health_check(conn).await,
            None => true,
        }
    }

    async fn close_conn(&self, conn: C) {
        if let Some(close) = &self.close {
            if let Err(err) = close(conn).await {
                log::debug!("Failed to close pooled connection: {err}");
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState<C>> {
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }
}
