//! The resource client seam between the cache layer and the backend.

use async_trait::async_trait;

use super::types::{
  Appointment, BookingRequest, Doctor, Profile, ProfileUpdate, Specialty, TimeSlot,
};
use crate::cache::QueryKey;
use crate::error::ClassifiedError;

/// Any value the cache can hold.
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
  Doctors(Vec<Doctor>),
  Doctor(Doctor),
  Specialties(Vec<Specialty>),
  Appointments(Vec<Appointment>),
  Appointment(Appointment),
  Slots(Vec<TimeSlot>),
  Profile(Profile),
}

impl Resource {
  pub fn kind(&self) -> &'static str {
    match self {
      Resource::Doctors(_) => "doctors",
      Resource::Doctor(_) => "doctor",
      Resource::Specialties(_) => "specialties",
      Resource::Appointments(_) => "appointments",
      Resource::Appointment(_) => "appointment",
      Resource::Slots(_) => "slots",
      Resource::Profile(_) => "profile",
    }
  }
}

macro_rules! resource_conversions {
  ($($variant:ident => $ty:ty),* $(,)?) => {
    $(
      impl TryFrom<Resource> for $ty {
        type Error = Resource;

        fn try_from(resource: Resource) -> Result<Self, Self::Error> {
          match resource {
            Resource::$variant(inner) => Ok(inner),
            other => Err(other),
          }
        }
      }

      impl From<$ty> for Resource {
        fn from(value: $ty) -> Self {
          Resource::$variant(value)
        }
      }
    )*
  };
}

resource_conversions! {
  Doctors => Vec<Doctor>,
  Doctor => Doctor,
  Specialties => Vec<Specialty>,
  Appointments => Vec<Appointment>,
  Appointment => Appointment,
  Slots => Vec<TimeSlot>,
  Profile => Profile,
}

/// Write operations against the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
  /// Book an appointment, optionally on behalf of another patient
  BookAppointment(BookingRequest),
  CancelAppointment { id: String, reason: Option<String> },
  UpdateProfile(ProfileUpdate),
}

impl Operation {
  pub fn name(&self) -> &'static str {
    match self {
      Operation::BookAppointment(_) => "book_appointment",
      Operation::CancelAppointment { .. } => "cancel_appointment",
      Operation::UpdateProfile(_) => "update_profile",
    }
  }
}

/// Typed request functions against the backend.
///
/// Implementations classify their own failures so that callers only ever see
/// [`ClassifiedError`].
#[async_trait]
pub trait ResourceClient: Send + Sync {
  async fn fetch_resource(&self, key: &QueryKey) -> Result<Resource, ClassifiedError>;

  async fn mutate_resource(&self, operation: &Operation) -> Result<Resource, ClassifiedError>;
}
