//! Test doubles for the resource client and the auth collaborator.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::api::auth::AuthProvider;
use crate::api::types::{Appointment, AppointmentStatus, Profile, Specialty};
use crate::api::{Operation, Resource, ResourceClient};
use crate::cache::QueryKey;
use crate::error::ClassifiedError;

type Scripted = (Duration, Result<Resource, ClassifiedError>);

/// Scripted resource client.
///
/// Responses are queued per key and consumed in order; the last queued
/// response is repeated once the queue is down to one.
#[derive(Default)]
pub struct FakeClient {
  fetches: Mutex<HashMap<QueryKey, VecDeque<Scripted>>>,
  fetch_calls: Mutex<HashMap<QueryKey, usize>>,
  mutations: Mutex<VecDeque<Scripted>>,
  mutation_calls: Mutex<Vec<Operation>>,
}

fn next_scripted(queue: &mut VecDeque<Scripted>) -> Option<Scripted> {
  if queue.len() > 1 {
    queue.pop_front()
  } else {
    queue.front().cloned()
  }
}

impl FakeClient {
  pub fn on_fetch(&self, key: &QueryKey, result: Result<Resource, ClassifiedError>) {
    self.on_fetch_delayed(key, Duration::ZERO, result);
  }

  pub fn on_fetch_delayed(
    &self,
    key: &QueryKey,
    delay: Duration,
    result: Result<Resource, ClassifiedError>,
  ) {
    self
      .fetches
      .lock()
      .entry(key.clone())
      .or_default()
      .push_back((delay, result));
  }

  pub fn on_mutate(&self, result: Result<Resource, ClassifiedError>) {
    self.on_mutate_delayed(Duration::ZERO, result);
  }

  pub fn on_mutate_delayed(&self, delay: Duration, result: Result<Resource, ClassifiedError>) {
    self.mutations.lock().push_back((delay, result));
  }

  pub fn fetch_count(&self, key: &QueryKey) -> usize {
    self.fetch_calls.lock().get(key).copied().unwrap_or(0)
  }

  pub fn mutation_calls(&self) -> Vec<Operation> {
    self.mutation_calls.lock().clone()
  }
}

#[async_trait]
impl ResourceClient for FakeClient {
  async fn fetch_resource(&self, key: &QueryKey) -> Result<Resource, ClassifiedError> {
    *self.fetch_calls.lock().entry(key.clone()).or_default() += 1;
    let scripted = self.fetches.lock().get_mut(key).and_then(next_scripted);
    let (delay, result) = scripted
      .unwrap_or_else(|| (Duration::ZERO, Err(ClassifiedError::unknown(format!("unscripted {}", key)))));
    if !delay.is_zero() {
      tokio::time::sleep(delay).await;
    }
    result
  }

  async fn mutate_resource(&self, operation: &Operation) -> Result<Resource, ClassifiedError> {
    self.mutation_calls.lock().push(operation.clone());
    let scripted = next_scripted(&mut self.mutations.lock());
    let (delay, result) = scripted
      .unwrap_or_else(|| (Duration::ZERO, Err(ClassifiedError::unknown("unscripted mutation"))));
    if !delay.is_zero() {
      tokio::time::sleep(delay).await;
    }
    result
  }
}

/// Auth double that counts session invalidations.
#[derive(Default)]
pub struct RecordingAuth {
  unauthorized: AtomicUsize,
}

impl RecordingAuth {
  pub fn unauthorized_calls(&self) -> usize {
    self.unauthorized.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl AuthProvider for RecordingAuth {
  async fn token(&self) -> Option<String> {
    Some("test-token".to_string())
  }

  fn on_unauthorized(&self) {
    self.unauthorized.fetch_add(1, Ordering::SeqCst);
  }
}

// ============================================================================
// Sample data
// ============================================================================

pub fn appointment(id: &str, status: AppointmentStatus) -> Appointment {
  Appointment {
    id: id.to_string(),
    doctor_id: "d1".to_string(),
    doctor_name: Some("Dr. Chen".to_string()),
    status,
    scheduled_at: "2026-11-02T09:30:00Z".parse().unwrap(),
    reason: None,
    cancellation_reason: None,
  }
}

pub fn appointments(items: &[(&str, AppointmentStatus)]) -> Resource {
  Resource::Appointments(
    items
      .iter()
      .map(|(id, status)| appointment(id, *status))
      .collect(),
  )
}

pub fn specialties(names: &[&str]) -> Resource {
  Resource::Specialties(
    names
      .iter()
      .enumerate()
      .map(|(i, name)| Specialty {
        id: (i + 1).to_string(),
        name: name.to_string(),
        description: None,
      })
      .collect(),
  )
}

pub fn profile(name: &str) -> Profile {
  Profile {
    id: "p1".to_string(),
    name: name.to_string(),
    email: "patient@example.com".to_string(),
    phone: None,
    date_of_birth: None,
  }
}
