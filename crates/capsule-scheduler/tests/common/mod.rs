#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use capsule_core::{Capsule, FixedClock, Owner};
use capsule_mail::{Transport, TransportError};
use capsule_store::{db, NewCapsule, NewOwner, SqliteCapsuleStore};
use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use tokio::sync::Notify;

pub const FROM: &str = "Capsules <noreply@example.com>";

pub fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

/// 2026-03-10 12:00 UTC.
pub fn now() -> DateTime<Utc> {
    ts(2026, 3, 10, 12, 0)
}

pub fn store() -> SqliteCapsuleStore {
    SqliteCapsuleStore::new(db::open_in_memory().unwrap(), Tz::UTC, Arc::new(FixedClock(now())))
}

pub async fn owner(store: &SqliteCapsuleStore, email: &str) -> Owner {
    store
        .create_owner(NewOwner {
            name: "Ada".into(),
            email: email.into(),
            timezone: String::new(),
        })
        .await
        .unwrap()
}

/// A capsule due today at 06:00, created at `created_hour` on New Year's Day.
pub async fn due_today(
    store: &SqliteCapsuleStore,
    owner_id: i64,
    title: &str,
    created_hour: u32,
) -> Capsule {
    store
        .insert_capsule(NewCapsule {
            owner_id,
            title: title.into(),
            message: format!("{title} body"),
            due_at: ts(2026, 3, 10, 6, 0),
            delivery_method: "email".into(),
            category: None,
            mood: None,
            image_url: None,
            created_at: ts(2026, 1, 1, created_hour, 0),
        })
        .await
        .unwrap()
}

#[derive(Debug, Clone)]
pub struct Sent {
    pub to: String,
    pub from: String,
    pub subject: String,
}

/// Records every send; fails the `fail_on`-th call (1-based) when set.
#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Mutex<Vec<Sent>>,
    calls: AtomicUsize,
    fail_on: Option<usize>,
}

impl RecordingTransport {
    pub fn failing_on(call: usize) -> Self {
        Self {
            fail_on: Some(call),
            ..Default::default()
        }
    }

    pub fn subjects(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|s| s.subject.clone()).collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(
        &self,
        to: &str,
        from: &str,
        subject: &str,
        _body: &str,
    ) -> Result<(), TransportError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on == Some(call) {
            return Err(TransportError::Build("simulated outage".into()));
        }
        self.sent.lock().unwrap().push(Sent {
            to: to.into(),
            from: from.into(),
            subject: subject.into(),
        });
        Ok(())
    }
}

/// Never completes.
pub struct HangingTransport;

#[async_trait]
impl Transport for HangingTransport {
    async fn send(&self, _: &str, _: &str, _: &str, _: &str) -> Result<(), TransportError> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

/// Blocks each send until the test releases it.
#[derive(Default)]
pub struct GatedTransport {
    pub entered: Notify,
    pub release: Notify,
    pub sends: AtomicUsize,
}

impl GatedTransport {
    pub fn send_count(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for GatedTransport {
    async fn send(&self, _: &str, _: &str, _: &str, _: &str) -> Result<(), TransportError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        self.release.notified().await;
        Ok(())
    }
}
