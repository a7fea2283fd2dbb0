//! Serde-deserializable types matching backend responses.
//!
//! The backend is not consistent about its payload shapes: collections come
//! either bare or wrapped in `{"data": ...}`, ids are `id` or `_id` and may be
//! numeric, names are split or joined. These types accept every variant seen
//! in the wild and normalize into the canonical types in [`super::types`].

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer};

use super::types::{Appointment, AppointmentStatus, Doctor, Profile, Specialty, TimeSlot};

/// Either a bare payload or one wrapped in a `data` envelope.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Envelope<T> {
  Wrapped { data: T },
  Bare(T),
}

impl<T> Envelope<T> {
  pub fn into_inner(self) -> T {
    match self {
      Envelope::Wrapped { data } => data,
      Envelope::Bare(data) => data,
    }
  }
}

/// Accept string or numeric ids.
fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
  D: Deserializer<'de>,
{
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum RawId {
    Str(String),
    Num(u64),
  }
  Ok(match RawId::deserialize(deserializer)? {
    RawId::Str(s) => s,
    RawId::Num(n) => n.to_string(),
  })
}

fn opt_id_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
  D: Deserializer<'de>,
{
  #[derive(Deserialize)]
  struct Wrapper(#[serde(deserialize_with = "id_string")] String);
  Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|w| w.0))
}

fn join_name(name: Option<String>, first: Option<String>, last: Option<String>) -> Option<String> {
  if let Some(name) = name.filter(|n| !n.trim().is_empty()) {
    return Some(name);
  }
  let joined = [first, last]
    .into_iter()
    .flatten()
    .filter(|s| !s.trim().is_empty())
    .collect::<Vec<_>>()
    .join(" ");
  (!joined.is_empty()).then_some(joined)
}

// ============================================================================
// Specialties
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiSpecialty {
  #[serde(alias = "_id", deserialize_with = "id_string")]
  pub id: String,
  pub name: String,
  pub description: Option<String>,
}

impl From<ApiSpecialty> for Specialty {
  fn from(api: ApiSpecialty) -> Self {
    Specialty {
      id: api.id,
      name: api.name,
      description: api.description,
    }
  }
}

/// Doctors embed their specialty either as an object or just its name.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ApiSpecialtyRef {
  Full(ApiSpecialty),
  Name(String),
}

impl From<ApiSpecialtyRef> for Specialty {
  fn from(api: ApiSpecialtyRef) -> Self {
    match api {
      ApiSpecialtyRef::Full(full) => full.into(),
      ApiSpecialtyRef::Name(name) => Specialty {
        id: name.to_lowercase(),
        name,
        description: None,
      },
    }
  }
}

// ============================================================================
// Doctors
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiDoctor {
  #[serde(alias = "_id", deserialize_with = "id_string")]
  pub id: String,
  pub name: Option<String>,
  pub first_name: Option<String>,
  pub last_name: Option<String>,
  pub specialty: Option<ApiSpecialtyRef>,
  #[serde(alias = "about")]
  pub bio: Option<String>,
  #[serde(alias = "fee")]
  pub consultation_fee: Option<f64>,
  pub rating: Option<f32>,
}

impl From<ApiDoctor> for Doctor {
  fn from(api: ApiDoctor) -> Self {
    let name = join_name(api.name, api.first_name, api.last_name)
      .unwrap_or_else(|| format!("Doctor {}", api.id));
    Doctor {
      id: api.id,
      name,
      specialty: api.specialty.map(Specialty::from),
      bio: api.bio,
      consultation_fee: api.consultation_fee,
      rating: api.rating,
    }
  }
}

// ============================================================================
// Appointments
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiDoctorRef {
  #[serde(alias = "_id", deserialize_with = "id_string")]
  pub id: String,
  pub name: Option<String>,
  pub first_name: Option<String>,
  pub last_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiAppointment {
  #[serde(alias = "_id", deserialize_with = "id_string")]
  pub id: String,
  #[serde(default, deserialize_with = "opt_id_string")]
  pub doctor_id: Option<String>,
  pub doctor: Option<ApiDoctorRef>,
  pub status: String,
  #[serde(alias = "scheduledAt", alias = "dateTime")]
  pub appointment_date: DateTime<Utc>,
  pub reason: Option<String>,
  pub cancellation_reason: Option<String>,
}

impl TryFrom<ApiAppointment> for Appointment {
  type Error = String;

  fn try_from(api: ApiAppointment) -> Result<Self, Self::Error> {
    let status = AppointmentStatus::parse(&api.status)
      .ok_or_else(|| format!("unknown appointment status '{}'", api.status))?;

    let (doctor_id, doctor_name) = match (api.doctor_id, api.doctor) {
      (_, Some(doctor)) => (
        doctor.id,
        join_name(doctor.name, doctor.first_name, doctor.last_name),
      ),
      (Some(id), None) => (id, None),
      (None, None) => return Err(format!("appointment {} has no doctor", api.id)),
    };

    Ok(Appointment {
      id: api.id,
      doctor_id,
      doctor_name,
      status,
      scheduled_at: api.appointment_date,
      reason: api.reason,
      cancellation_reason: api.cancellation_reason,
    })
  }
}

// ============================================================================
// Slots
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ApiSlot {
  Detailed {
    #[serde(alias = "startTime", alias = "time")]
    start: DateTime<Utc>,
    #[serde(default = "default_true", alias = "isAvailable")]
    available: bool,
  },
  /// Plain timestamps mean "available"
  Bare(DateTime<Utc>),
}

fn default_true() -> bool {
  true
}

impl From<ApiSlot> for TimeSlot {
  fn from(api: ApiSlot) -> Self {
    match api {
      ApiSlot::Detailed { start, available } => TimeSlot {
        starts_at: start,
        available,
      },
      ApiSlot::Bare(start) => TimeSlot {
        starts_at: start,
        available: true,
      },
    }
  }
}

/// Slots come as a bare list or under a `slots` key
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ApiSlotList {
  Keyed { slots: Vec<ApiSlot> },
  Bare(Vec<ApiSlot>),
}

impl ApiSlotList {
  pub fn into_slots(self) -> Vec<TimeSlot> {
    let slots = match self {
      ApiSlotList::Keyed { slots } => slots,
      ApiSlotList::Bare(slots) => slots,
    };
    slots.into_iter().map(TimeSlot::from).collect()
  }
}

// ============================================================================
// Profile
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiProfile {
  #[serde(alias = "_id", deserialize_with = "id_string")]
  pub id: String,
  pub name: Option<String>,
  pub first_name: Option<String>,
  pub last_name: Option<String>,
  pub email: String,
  #[serde(alias = "phoneNumber")]
  pub phone: Option<String>,
  pub date_of_birth: Option<NaiveDate>,
}

impl From<ApiProfile> for Profile {
  fn from(api: ApiProfile) -> Self {
    Profile {
      name: join_name(api.name, api.first_name, api.last_name).unwrap_or_default(),
      id: api.id,
      email: api.email,
      phone: api.phone,
      date_of_birth: api.date_of_birth,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_envelope_accepts_both_shapes() {
    let wrapped: Envelope<Vec<ApiSpecialty>> =
      serde_json::from_str(r#"{"data":[{"id":1,"name":"Cardiology"}]}"#).unwrap();
    let bare: Envelope<Vec<ApiSpecialty>> =
      serde_json::from_str(r#"[{"_id":"1","name":"Cardiology"}]"#).unwrap();
    assert_eq!(wrapped.into_inner()[0].id, "1");
    assert_eq!(bare.into_inner()[0].id, "1");
  }

  #[test]
  fn test_doctor_normalization() {
    let api: ApiDoctor = serde_json::from_str(
      r#"{"_id":"d7","firstName":"Lena","lastName":"Ortiz","specialty":"Dermatology","fee":40.0}"#,
    )
    .unwrap();
    let doctor = Doctor::from(api);
    assert_eq!(doctor.name, "Lena Ortiz");
    assert_eq!(doctor.specialty.unwrap().name, "Dermatology");
    assert_eq!(doctor.consultation_fee, Some(40.0));
  }

  #[test]
  fn test_appointment_with_nested_doctor() {
    let api: ApiAppointment = serde_json::from_str(
      r#"{"id":"a1","doctor":{"id":5,"name":"Dr. Chen"},"status":"confirmed","appointmentDate":"2026-11-02T09:30:00Z"}"#,
    )
    .unwrap();
    let appointment = Appointment::try_from(api).unwrap();
    assert_eq!(appointment.doctor_id, "5");
    assert_eq!(appointment.doctor_name.as_deref(), Some("Dr. Chen"));
    assert_eq!(appointment.status, AppointmentStatus::Confirmed);
  }

  #[test]
  fn test_appointment_unknown_status_is_rejected() {
    let api: ApiAppointment = serde_json::from_str(
      r#"{"id":"a1","doctorId":"d1","status":"lost","scheduledAt":"2026-11-02T09:30:00Z"}"#,
    )
    .unwrap();
    assert!(Appointment::try_from(api).is_err());
  }

  #[test]
  fn test_slot_shapes() {
    let list: ApiSlotList = serde_json::from_str(
      r#"{"slots":[{"startTime":"2026-11-02T09:00:00Z","isAvailable":false},"2026-11-02T09:30:00Z"]}"#,
    )
    .unwrap();
    let slots = list.into_slots();
    assert_eq!(slots.len(), 2);
    assert!(!slots[0].available);
    assert!(slots[1].available);
  }
}
