use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Medical specialty (reference data)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Specialty {
  pub id: String,
  pub name: String,
  pub description: Option<String>,
}

/// Doctor summary and detail share one shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Doctor {
  pub id: String,
  pub name: String,
  pub specialty: Option<Specialty>,
  pub bio: Option<String>,
  pub consultation_fee: Option<f64>,
  pub rating: Option<f32>,
}

/// Appointment status as reported by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AppointmentStatus {
  Pending,
  Confirmed,
  Completed,
  Cancelled,
  Rejected,
}

impl AppointmentStatus {
  /// Parse a status string, tolerating case and the US spelling.
  pub fn parse(s: &str) -> Option<Self> {
    match s.trim().to_ascii_uppercase().as_str() {
      "PENDING" => Some(Self::Pending),
      "CONFIRMED" => Some(Self::Confirmed),
      "COMPLETED" => Some(Self::Completed),
      "CANCELLED" | "CANCELED" => Some(Self::Cancelled),
      "REJECTED" => Some(Self::Rejected),
      _ => None,
    }
  }

  /// Whether a cancel request makes sense for this status
  pub fn is_cancellable(&self) -> bool {
    matches!(self, Self::Pending | Self::Confirmed)
  }
}

impl fmt::Display for AppointmentStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Self::Pending => "PENDING",
      Self::Confirmed => "CONFIRMED",
      Self::Completed => "COMPLETED",
      Self::Cancelled => "CANCELLED",
      Self::Rejected => "REJECTED",
    };
    f.write_str(s)
  }
}

/// A booked appointment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
  pub id: String,
  pub doctor_id: String,
  pub doctor_name: Option<String>,
  pub status: AppointmentStatus,
  pub scheduled_at: DateTime<Utc>,
  pub reason: Option<String>,
  pub cancellation_reason: Option<String>,
}

/// A bookable time slot for a doctor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
  pub starts_at: DateTime<Utc>,
  pub available: bool,
}

/// The signed-in patient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
  pub id: String,
  pub name: String,
  pub email: String,
  pub phone: Option<String>,
  pub date_of_birth: Option<NaiveDate>,
}

/// Patient details sent along with a booking made on someone's behalf
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientInfo {
  pub name: String,
  pub phone: Option<String>,
  pub date_of_birth: Option<NaiveDate>,
}

/// Request body for booking an appointment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
  pub doctor_id: String,
  #[serde(rename = "appointmentDate")]
  pub scheduled_at: DateTime<Utc>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub reason: Option<String>,
  #[serde(rename = "patientInfo", skip_serializing_if = "Option::is_none")]
  pub patient: Option<PatientInfo>,
}

/// Partial profile update; absent fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub phone: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub date_of_birth: Option<NaiveDate>,
}

impl ProfileUpdate {
  /// Apply this update to a profile, as the server is expected to.
  pub fn apply_to(&self, profile: &Profile) -> Profile {
    Profile {
      name: self.name.clone().unwrap_or_else(|| profile.name.clone()),
      phone: self.phone.clone().or_else(|| profile.phone.clone()),
      date_of_birth: self.date_of_birth.or(profile.date_of_birth),
      ..profile.clone()
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_status_parse() {
    assert_eq!(AppointmentStatus::parse("pending"), Some(AppointmentStatus::Pending));
    assert_eq!(AppointmentStatus::parse("Canceled"), Some(AppointmentStatus::Cancelled));
    assert_eq!(AppointmentStatus::parse("NO_SHOW"), None);
  }

  #[test]
  fn test_booking_request_wire_shape() {
    let request = BookingRequest {
      doctor_id: "d1".into(),
      scheduled_at: "2026-11-02T09:30:00Z".parse().unwrap(),
      reason: None,
      patient: None,
    };
    let json = serde_json::to_value(&request).unwrap();
    assert_eq!(json["doctorId"], "d1");
    assert_eq!(json["appointmentDate"], "2026-11-02T09:30:00Z");
    assert!(json.get("patientInfo").is_none());
  }

  #[test]
  fn test_profile_update_keeps_untouched_fields() {
    let profile = Profile {
      id: "p1".into(),
      name: "Ana".into(),
      email: "ana@example.com".into(),
      phone: Some("555".into()),
      date_of_birth: None,
    };
    let update = ProfileUpdate {
      name: Some("Ana Maria".into()),
      ..Default::default()
    };
    let updated = update.apply_to(&profile);
    assert_eq!(updated.name, "Ana Maria");
    assert_eq!(updated.phone.as_deref(), Some("555"));
    assert_eq!(updated.email, "ana@example.com");
  }
}
