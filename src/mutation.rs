//! Optimistic writes.
//!
//! Every write goes through [`MutationCoordinator::mutate`], which follows one
//! protocol regardless of the operation:
//!
//! 1. snapshot the cached entries the write can affect
//! 2. apply a speculative change to them so consumers see it immediately
//! 3. send the operation to the backend
//! 4. on success, invalidate and refetch the affected keys; the server's
//!    answer replaces the speculative one
//! 5. on failure, put the snapshot back and hand the classified error to the
//!    caller
//!
//! Snapshot and speculative change happen in one step on the store, so two
//! overlapping mutations are ordered by call: the second one snapshots the
//! first one's speculative state. A rollback never overwrites a key that was
//! reconciled after its snapshot was taken.

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::api::types::{
  Appointment, AppointmentStatus, BookingRequest, Profile, ProfileUpdate, TimeSlot,
};
use crate::api::{Operation, Resource};
use crate::cache::{CacheEntry, CacheStore, CapturedEntry, KeyPattern, QueryKey, ResourceClass};
use crate::error::{escalate, ClassifiedError};

/// Cache state captured before a speculative change.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimisticSnapshot {
  pub affected_keys: Vec<QueryKey>,
  pub prior_values: HashMap<QueryKey, CacheEntry>,
  /// Generation each key was left at by the speculative change
  generations: HashMap<QueryKey, u64>,
}

impl OptimisticSnapshot {
  fn new(prior: Vec<CapturedEntry>) -> Self {
    let mut snapshot = Self {
      affected_keys: Vec::with_capacity(prior.len()),
      prior_values: HashMap::with_capacity(prior.len()),
      generations: HashMap::with_capacity(prior.len()),
    };
    for CapturedEntry { entry, generation } in prior {
      snapshot.affected_keys.push(entry.key.clone());
      snapshot.generations.insert(entry.key.clone(), generation);
      snapshot.prior_values.insert(entry.key.clone(), entry);
    }
    snapshot
  }

  fn into_entries(self) -> Vec<CapturedEntry> {
    let Self {
      prior_values,
      mut generations,
      ..
    } = self;
    prior_values
      .into_iter()
      .filter_map(|(key, entry)| {
        let generation = generations.remove(&key)?;
        Some(CapturedEntry { entry, generation })
      })
      .collect()
  }
}

/// Runs write operations with optimistic updates and rollback.
#[derive(Clone)]
pub struct MutationCoordinator {
  store: CacheStore,
  provisional_ids: Arc<AtomicU64>,
}

impl MutationCoordinator {
  pub fn new(store: CacheStore) -> Self {
    Self {
      store,
      provisional_ids: Arc::new(AtomicU64::new(1)),
    }
  }

  pub fn store(&self) -> &CacheStore {
    &self.store
  }

  /// Run `operation` with a speculative cache change.
  ///
  /// `optimistic_updater` is called with every cached entry matching
  /// `invalidation_keys` that has data; returning `Some` replaces that data
  /// until the server answers. It runs under the store lock and must not call
  /// back into the store.
  pub async fn mutate<U>(
    &self,
    operation: Operation,
    optimistic_updater: U,
    invalidation_keys: &[KeyPattern],
  ) -> Result<Resource, ClassifiedError>
  where
    U: Fn(&QueryKey, &Resource) -> Option<Resource>,
  {
    let name = operation.name();
    let snapshot = OptimisticSnapshot::new(
      self
        .store
        .apply_optimistic(invalidation_keys, optimistic_updater),
    );
    debug!(
      operation = name,
      affected = snapshot.affected_keys.len(),
      "Applied optimistic update"
    );

    match self.send(&operation).await {
      Ok(resource) => {
        drop(snapshot);
        for pattern in invalidation_keys {
          self.store.reconcile(pattern);
        }
        info!(operation = name, "Mutation succeeded");
        Ok(resource)
      }
      Err(error) => {
        escalate(&error, self.store.auth().as_ref());
        let restored = snapshot.affected_keys.len();
        self.store.restore(snapshot.into_entries());
        warn!(operation = name, restored, error = %error, "Mutation failed, rolled back");
        Err(error)
      }
    }
  }

  /// Send with the mutation retry policy: one more try when the request
  /// never reached the server.
  async fn send(&self, operation: &Operation) -> Result<Resource, ClassifiedError> {
    let retry = self.store.policies().mutation_retry().clone();
    let mut failures = 0u32;
    loop {
      match self.store.client().mutate_resource(operation).await {
        Ok(resource) => return Ok(resource),
        Err(error) => {
          failures += 1;
          if !retry.should_retry(failures, &error) {
            return Err(error);
          }
          info!(operation = operation.name(), error = %error, "Mutation unreachable, retrying");
          tokio::time::sleep(retry.delay).await;
        }
      }
    }
  }

  // ==========================================================================
  // Appointment and profile writes
  // ==========================================================================

  /// Book an appointment. Shows a provisional PENDING entry in the
  /// appointment list and takes the slot out of the day's availability.
  pub async fn book_appointment(
    &self,
    request: BookingRequest,
  ) -> Result<Appointment, ClassifiedError> {
    let provisional = Appointment {
      id: format!(
        "optimistic-{}",
        self.provisional_ids.fetch_add(1, Ordering::Relaxed)
      ),
      doctor_id: request.doctor_id.clone(),
      doctor_name: None,
      status: AppointmentStatus::Pending,
      scheduled_at: request.scheduled_at,
      reason: request.reason.clone(),
      cancellation_reason: None,
    };
    let booked_day = request.scheduled_at.date_naive();
    let doctor_id = request.doctor_id.clone();

    let updater = move |key: &QueryKey, data: &Resource| match (key, data) {
      (QueryKey::MyAppointments, Resource::Appointments(list)) => {
        let mut list = list.clone();
        list.push(provisional.clone());
        Some(Resource::Appointments(list))
      }
      (QueryKey::AvailableSlots { doctor_id: d, date }, Resource::Slots(slots))
        if *d == doctor_id && *date == booked_day =>
      {
        let slots = slots
          .iter()
          .map(|slot| TimeSlot {
            available: slot.available && slot.starts_at != provisional.scheduled_at,
            ..slot.clone()
          })
          .collect();
        Some(Resource::Slots(slots))
      }
      _ => None,
    };

    let resource = self
      .mutate(
        Operation::BookAppointment(request),
        updater,
        &[KeyPattern::Class(ResourceClass::Appointments)],
      )
      .await?;
    expect_resource(resource)
  }

  /// Cancel an appointment. Shows it as CANCELLED until the server confirms.
  /// Appointments that are already finished are left alone.
  pub async fn cancel_appointment(
    &self,
    id: &str,
    reason: Option<String>,
  ) -> Result<Appointment, ClassifiedError> {
    let target = id.to_string();
    let cancelled = |appointment: &Appointment| Appointment {
      status: AppointmentStatus::Cancelled,
      cancellation_reason: reason.clone().or_else(|| appointment.cancellation_reason.clone()),
      ..appointment.clone()
    };

    let updater = |key: &QueryKey, data: &Resource| match (key, data) {
      (QueryKey::MyAppointments, Resource::Appointments(list)) => {
        if !list.iter().any(|a| a.id == target && a.status.is_cancellable()) {
          return None;
        }
        let list = list
          .iter()
          .map(|a| if a.id == target { cancelled(a) } else { a.clone() })
          .collect();
        Some(Resource::Appointments(list))
      }
      (QueryKey::Appointment { id }, Resource::Appointment(appointment))
        if *id == target && appointment.status.is_cancellable() =>
      {
        Some(Resource::Appointment(cancelled(appointment)))
      }
      _ => None,
    };

    let resource = self
      .mutate(
        Operation::CancelAppointment {
          id: id.to_string(),
          reason: reason.clone(),
        },
        updater,
        &[KeyPattern::Class(ResourceClass::Appointments)],
      )
      .await?;
    expect_resource(resource)
  }

  /// Update the patient's profile, merging the change into the cached copy.
  pub async fn update_profile(&self, update: ProfileUpdate) -> Result<Profile, ClassifiedError> {
    let patch = update.clone();
    let updater = move |_: &QueryKey, data: &Resource| match data {
      Resource::Profile(profile) => Some(Resource::Profile(patch.apply_to(profile))),
      _ => None,
    };

    let resource = self
      .mutate(
        Operation::UpdateProfile(update),
        updater,
        &[KeyPattern::Class(ResourceClass::Profile)],
      )
      .await?;
    expect_resource(resource)
  }

  /// Build a reusable mutation handle around one kind of write.
  pub fn mutation<P, R, F, Fut>(&self, run: F) -> Mutation<P, R>
  where
    F: Fn(MutationCoordinator, P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, ClassifiedError>> + Send + 'static,
  {
    Mutation::new(self.clone(), run)
  }
}

fn expect_resource<T>(resource: Resource) -> Result<T, ClassifiedError>
where
  T: TryFrom<Resource, Error = Resource>,
{
  T::try_from(resource)
    .map_err(|other| ClassifiedError::unknown(format!("Unexpected {} response", other.kind())))
}

/// Progress of the latest call on a [`Mutation`].
#[derive(Debug, Clone, PartialEq, Default)]
pub enum MutationStatus {
  #[default]
  Idle,
  Pending,
  Success,
  Error(ClassifiedError),
}

type RunFn<P, R> =
  Arc<dyn Fn(MutationCoordinator, P) -> BoxFuture<'static, Result<R, ClassifiedError>> + Send + Sync>;

/// A write bound to one operation kind, tracking the status of its last call.
pub struct Mutation<P, R> {
  coordinator: MutationCoordinator,
  run: RunFn<P, R>,
  status: Arc<Mutex<MutationStatus>>,
}

impl<P, R> Mutation<P, R> {
  pub fn new<F, Fut>(coordinator: MutationCoordinator, run: F) -> Self
  where
    F: Fn(MutationCoordinator, P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, ClassifiedError>> + Send + 'static,
  {
    Self {
      coordinator,
      run: Arc::new(move |c: MutationCoordinator, p: P| run(c, p).boxed()),
      status: Arc::new(Mutex::new(MutationStatus::Idle)),
    }
  }

  pub fn status(&self) -> MutationStatus {
    self.status.lock().clone()
  }

  pub fn is_pending(&self) -> bool {
    matches!(*self.status.lock(), MutationStatus::Pending)
  }

  pub async fn mutate(&self, payload: P) -> Result<R, ClassifiedError> {
    *self.status.lock() = MutationStatus::Pending;
    let result = (self.run)(self.coordinator.clone(), payload).await;
    *self.status.lock() = match &result {
      Ok(_) => MutationStatus::Success,
      Err(error) => MutationStatus::Error(error.clone()),
    };
    result
  }

  pub fn reset(&self) {
    *self.status.lock() = MutationStatus::Idle;
  }
}
