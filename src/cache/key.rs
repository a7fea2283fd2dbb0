//! Query keys and the patterns used to match them.

use chrono::NaiveDate;
use std::fmt;

/// Resource classes. Each one has its own freshness and retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceClass {
  Doctors,
  Appointments,
  Specialties,
  Profile,
}

impl ResourceClass {
  pub const ALL: [ResourceClass; 4] = [
    ResourceClass::Doctors,
    ResourceClass::Appointments,
    ResourceClass::Specialties,
    ResourceClass::Profile,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      ResourceClass::Doctors => "doctors",
      ResourceClass::Appointments => "appointments",
      ResourceClass::Specialties => "specialties",
      ResourceClass::Profile => "profile",
    }
  }
}

impl fmt::Display for ResourceClass {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Identifies one cached query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
  /// Doctor list, optionally filtered by specialty
  Doctors { specialty: Option<String> },
  /// Single doctor
  Doctor { id: String },
  /// All specialties
  Specialties,
  /// The signed-in patient's appointments
  MyAppointments,
  /// Single appointment
  Appointment { id: String },
  /// Bookable slots for a doctor on a day. Lives with appointments since
  /// booking or cancelling changes it.
  AvailableSlots { doctor_id: String, date: NaiveDate },
  /// The signed-in patient
  Profile,
}

impl QueryKey {
  pub fn resource_class(&self) -> ResourceClass {
    match self {
      QueryKey::Doctors { .. } | QueryKey::Doctor { .. } => ResourceClass::Doctors,
      QueryKey::Specialties => ResourceClass::Specialties,
      QueryKey::MyAppointments | QueryKey::Appointment { .. } | QueryKey::AvailableSlots { .. } => {
        ResourceClass::Appointments
      }
      QueryKey::Profile => ResourceClass::Profile,
    }
  }

  /// Stable string form, always prefixed with the resource class.
  pub fn cache_key(&self) -> String {
    match self {
      QueryKey::Doctors { specialty: None } => "doctors:list".to_string(),
      QueryKey::Doctors {
        specialty: Some(specialty),
      } => format!("doctors:list:specialty={}", specialty),
      QueryKey::Doctor { id } => format!("doctors:detail:{}", id),
      QueryKey::Specialties => "specialties:list".to_string(),
      QueryKey::MyAppointments => "appointments:my".to_string(),
      QueryKey::Appointment { id } => format!("appointments:detail:{}", id),
      QueryKey::AvailableSlots { doctor_id, date } => {
        format!("appointments:slots:{}:{}", doctor_id, date.format("%Y-%m-%d"))
      }
      QueryKey::Profile => "profile:me".to_string(),
    }
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.cache_key())
  }
}

/// Selects a set of keys for invalidation, refetching or snapshotting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPattern {
  Exact(QueryKey),
  Class(ResourceClass),
  /// Matches keys whose string form starts with the prefix
  Prefix(String),
}

impl KeyPattern {
  pub fn matches(&self, key: &QueryKey) -> bool {
    match self {
      KeyPattern::Exact(exact) => exact == key,
      KeyPattern::Class(class) => key.resource_class() == *class,
      KeyPattern::Prefix(prefix) => key.cache_key().starts_with(prefix.as_str()),
    }
  }
}

impl From<QueryKey> for KeyPattern {
  fn from(key: QueryKey) -> Self {
    KeyPattern::Exact(key)
  }
}

impl From<ResourceClass> for KeyPattern {
  fn from(class: ResourceClass) -> Self {
    KeyPattern::Class(class)
  }
}

impl fmt::Display for KeyPattern {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      KeyPattern::Exact(key) => write!(f, "{}", key),
      KeyPattern::Class(class) => write!(f, "{}:*", class),
      KeyPattern::Prefix(prefix) => write!(f, "{}*", prefix),
    }
  }
}
