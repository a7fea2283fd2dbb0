//! CLI commands and their plain-text output

use chrono::{DateTime, Local, NaiveDate, Utc};
use clap::Subcommand;
use color_eyre::Result;

use crate::api::types::{
  Appointment, BookingRequest, Doctor, PatientInfo, Profile, ProfileUpdate, Specialty, TimeSlot,
};
use crate::api::TokenStore;
use crate::query::QueryState;
use crate::sync::Lifecycle;

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
  /// List doctors
  Doctors {
    /// Only doctors with this specialty id
    #[arg(short, long)]
    specialty: Option<String>,
  },
  /// Show one doctor
  Doctor { id: String },
  /// Open slots for a doctor on a day (YYYY-MM-DD)
  Slots { doctor: String, date: NaiveDate },
  /// List specialties
  Specialties,
  /// List your appointments
  Appointments,
  /// Book an appointment
  Book {
    #[arg(long)]
    doctor: String,
    /// Start time, RFC 3339
    #[arg(long)]
    at: DateTime<Utc>,
    #[arg(long)]
    reason: Option<String>,
    /// Book on behalf of another patient
    #[arg(long, requires = "patient_phone")]
    patient_name: Option<String>,
    #[arg(long, requires = "patient_name")]
    patient_phone: Option<String>,
  },
  /// Cancel an appointment
  Cancel {
    id: String,
    #[arg(long)]
    reason: Option<String>,
  },
  /// Show your profile, or update it when any field is given
  Profile {
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    phone: Option<String>,
    #[arg(long)]
    date_of_birth: Option<NaiveDate>,
  },
  /// Store an access token
  Login { token: String },
  /// Forget the stored access token
  Logout,
  /// Live view of your appointments, refreshed while the terminal has focus
  Watch,
}

impl Command {
  /// Commands that only touch the local session and need no backend.
  pub fn is_session(&self) -> bool {
    matches!(self, Command::Login { .. } | Command::Logout)
  }

  /// Booking request for a `book` command.
  pub fn booking_request(&self) -> Option<BookingRequest> {
    let Command::Book {
      doctor,
      at,
      reason,
      patient_name,
      patient_phone,
    } = self
    else {
      return None;
    };

    Some(BookingRequest {
      doctor_id: doctor.clone(),
      scheduled_at: *at,
      reason: reason.clone(),
      patient: patient_name.as_ref().map(|name| PatientInfo {
        name: name.clone(),
        phone: patient_phone.clone(),
        date_of_birth: None,
      }),
    })
  }

  /// Profile changes for a `profile` command, if any field was given.
  pub fn profile_update(&self) -> Option<ProfileUpdate> {
    let Command::Profile {
      name,
      phone,
      date_of_birth,
    } = self
    else {
      return None;
    };

    let update = ProfileUpdate {
      name: name.clone(),
      phone: phone.clone(),
      date_of_birth: *date_of_birth,
    };
    (update != ProfileUpdate::default()).then_some(update)
  }
}

/// Run `login` / `logout`.
pub fn run_session(tokens: &TokenStore, command: &Command) -> Result<()> {
  match command {
    Command::Login { token } => {
      tokens.save(token.trim())?;
      println!("Signed in.");
    }
    Command::Logout => {
      tokens.clear()?;
      println!("Signed out.");
    }
    _ => {}
  }
  Ok(())
}

// ============================================================================
// Output
// ============================================================================

fn local_time(at: &DateTime<Utc>) -> String {
  at.with_timezone(&Local).format("%a %Y-%m-%d %H:%M").to_string()
}

pub fn doctor_line(doctor: &Doctor) -> String {
  let mut line = format!("{:<10} {}", doctor.id, doctor.name);
  if let Some(specialty) = &doctor.specialty {
    line.push_str(&format!(" ({})", specialty.name));
  }
  if let Some(rating) = doctor.rating {
    line.push_str(&format!(" ★{:.1}", rating));
  }
  line
}

pub fn doctor_details(doctor: &Doctor) -> Vec<String> {
  let mut lines = vec![doctor_line(doctor)];
  if let Some(fee) = doctor.consultation_fee {
    lines.push(format!("Fee: {:.2}", fee));
  }
  if let Some(bio) = &doctor.bio {
    lines.push(String::new());
    lines.push(bio.clone());
  }
  lines
}

pub fn specialty_line(specialty: &Specialty) -> String {
  match &specialty.description {
    Some(description) => format!("{:<10} {} - {}", specialty.id, specialty.name, description),
    None => format!("{:<10} {}", specialty.id, specialty.name),
  }
}

pub fn slot_line(slot: &TimeSlot) -> String {
  let marker = if slot.available { "open" } else { "taken" };
  format!("{}  {}", local_time(&slot.starts_at), marker)
}

pub fn appointment_line(appointment: &Appointment) -> String {
  let doctor = appointment
    .doctor_name
    .as_deref()
    .unwrap_or(&appointment.doctor_id);
  format!(
    "{:<12} {:<10} {}  {}",
    appointment.id,
    appointment.status.to_string(),
    local_time(&appointment.scheduled_at),
    doctor
  )
}

pub fn profile_lines(profile: &Profile) -> Vec<String> {
  let mut lines = vec![
    format!("Name:  {}", profile.name),
    format!("Email: {}", profile.email),
  ];
  if let Some(phone) = &profile.phone {
    lines.push(format!("Phone: {}", phone));
  }
  if let Some(dob) = profile.date_of_birth {
    lines.push(format!("Born:  {}", dob));
  }
  lines
}

/// Screen contents for the watch command.
pub fn watch_screen(state: &QueryState<Vec<Appointment>>, lifecycle: Lifecycle) -> Vec<String> {
  let mut lines = vec![format!(
    "My appointments ({})   r: refresh  q: quit",
    lifecycle
  )];
  lines.push(String::new());

  match state {
    QueryState::Idle | QueryState::Loading => lines.push("Loading...".to_string()),
    QueryState::Success(list) | QueryState::Error { data: Some(list), .. } if list.is_empty() => {
      lines.push("No appointments.".to_string())
    }
    QueryState::Success(list) | QueryState::Error { data: Some(list), .. } => {
      lines.extend(list.iter().map(appointment_line))
    }
    QueryState::Error { data: None, .. } => {}
  }

  if let Some(error) = state.error() {
    lines.push(String::new());
    lines.push(format!("! {}", error.message));
  }
  lines
}
