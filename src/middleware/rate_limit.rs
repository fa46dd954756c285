use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use actix_service::{forward_ready, Service};
use actix_web::dev::{ServiceRequest, ServiceResponse, Transform};
use actix_web::Error;
use dashmap::DashMap;
use futures::future::{ok, LocalBoxFuture, Ready};

use crate::config::{RateLimitConfig, RateLimitRule};
use crate::error::AppError;

/// Counter backend for fixed-window limits. Implementations must be shareable
/// across workers.
pub trait RateLimitStore: Send + Sync {
    /// Counts one request against `key` and returns the count within the
    /// current window together with the window's start.
    fn hit(&self, key: &str, window: Duration, now: Instant) -> (u32, Instant);
}

#[derive(Default)]
pub struct MemoryRateLimitStore {
    windows: DashMap<String, (u32, Instant)>,
}

impl MemoryRateLimitStore {
    /// Drops windows that ended before `now`.
    pub fn purge(&self, window: Duration, now: Instant) {
        self.windows
            .retain(|_, (_, started)| now.duration_since(*started) < window);
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }
}

impl RateLimitStore for MemoryRateLimitStore {
    fn hit(&self, key: &str, window: Duration, now: Instant) -> (u32, Instant) {
        let mut entry = self.windows.entry(key.to_string()).or_insert((0, now));
        let (count, started) = entry.value_mut();
        if now.duration_since(*started) >= window {
            *count = 0;
            *started = now;
        }
        *count += 1;
        (*count, *started)
    }
}

/// One named quota applied per client address.
#[derive(Clone)]
pub struct RateLimiter {
    name: &'static str,
    rule: RateLimitRule,
    store: Arc<dyn RateLimitStore>,
    trust_forwarded: bool,
}

impl RateLimiter {
    pub fn new(name: &'static str, rule: RateLimitRule, store: Arc<dyn RateLimitStore>) -> Self {
        RateLimiter {
            name,
            rule,
            store,
            trust_forwarded: false,
        }
    }

    /// Keys on `Forwarded` / `X-Forwarded-For` instead of the socket peer.
    /// Only safe behind a proxy that overwrites those headers.
    pub fn trust_forwarded(mut self, trust: bool) -> Self {
        self.trust_forwarded = trust;
        self
    }

    fn client(&self, req: &ServiceRequest) -> String {
        if self.trust_forwarded {
            if let Some(addr) = req.connection_info().realip_remote_addr() {
                return addr.to_string();
            }
        }
        req.peer_addr()
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    pub fn check(&self, client: &str, now: Instant) -> Result<(), AppError> {
        let key = format!("{}:{}", self.name, client);
        let (count, started) = self.store.hit(&key, self.rule.window, now);
        if count <= self.rule.max_requests {
            return Ok(());
        }

        let elapsed = now.duration_since(started);
        let remaining = self.rule.window.saturating_sub(elapsed);
        log::warn!("Rate limit '{}' exceeded for {}", self.name, client);
        Err(AppError::RateLimited {
            retry_after_secs: remaining.as_secs().max(1),
        })
    }
}

/// The quotas the routes are wrapped with, all sharing one store.
#[derive(Clone)]
pub struct Limiters {
    pub login: RateLimiter,
    pub register: RateLimiter,
    pub api: RateLimiter,
    pub strict: RateLimiter,
}

impl Limiters {
    pub fn new(config: &RateLimitConfig, store: Arc<dyn RateLimitStore>) -> Self {
        let limiter = |name, rule| {
            RateLimiter::new(name, rule, store.clone()).trust_forwarded(config.trust_forwarded_for)
        };
        Limiters {
            login: limiter("login", config.login),
            register: limiter("register", config.register),
            api: limiter("api", config.api),
            strict: limiter("strict", config.strict),
        }
    }
}

pub struct RateLimit {
    limiter: RateLimiter,
}

impl RateLimit {
    pub fn new(limiter: RateLimiter) -> Self {
        RateLimit { limiter }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimit
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = RateLimitService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(RateLimitService {
            service: Rc::new(service),
            limiter: self.limiter.clone(),
        })
    }
}

pub struct RateLimitService<S> {
    service: Rc<S>,
    limiter: RateLimiter,
}

impl<S, B> Service<ServiceRequest> for RateLimitService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let client = self.limiter.client(&req);
        let verdict = self.limiter.check(&client, Instant::now());
        let service = self.service.clone();

        Box::pin(async move {
            verdict?;
            service.call(req).await
        })
    }
}
