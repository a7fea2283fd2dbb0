use async_trait::async_trait;
use chrono::NaiveDate;
use color_eyre::{eyre::eyre, Result};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::api_types::{ApiAppointment, ApiDoctor, ApiProfile, ApiSlotList, ApiSpecialty, Envelope};
use super::auth::AuthProvider;
use super::resource::{Operation, Resource, ResourceClient};
use super::types::{
  Appointment, BookingRequest, Doctor, Profile, ProfileUpdate, Specialty, TimeSlot,
};
use crate::cache::QueryKey;
use crate::config::Config;
use crate::error::{classify, ClassifiedError, RawFailure};

/// Booking backend client
#[derive(Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  base_url: Url,
  auth: Arc<dyn AuthProvider>,
}

#[derive(Serialize)]
struct CancelBody<'a> {
  #[serde(skip_serializing_if = "Option::is_none")]
  reason: Option<&'a str>,
}

impl ApiClient {
  pub fn new(config: &Config, auth: Arc<dyn AuthProvider>) -> Result<Self> {
    let base_url = Url::parse(&config.api.url)
      .map_err(|e| eyre!("Invalid API url '{}': {}", config.api.url, e))?;
    Self::with_base_url(base_url, config.api.timeout(), auth)
  }

  pub fn with_base_url(base_url: Url, timeout: Duration, auth: Arc<dyn AuthProvider>) -> Result<Self> {
    if base_url.cannot_be_a_base() {
      return Err(eyre!("API url '{}' cannot be used as a base", base_url));
    }

    let http = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(concat!("medbook/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base_url,
      auth,
    })
  }

  /// Build a URL under the base path, one escaped segment per element.
  fn endpoint(&self, segments: &[&str]) -> Url {
    let mut url = self.base_url.clone();
    if let Ok(mut path) = url.path_segments_mut() {
      path.pop_if_empty().extend(segments);
    }
    url
  }

  /// Send a request and decode the (possibly enveloped) JSON body.
  async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ClassifiedError> {
    self
      .send_optional(builder)
      .await?
      .ok_or_else(|| classify(&RawFailure::Decode("empty response body".into())))
  }

  /// Like [`send`](Self::send), but an empty body is not an error.
  async fn send_optional<T: DeserializeOwned>(
    &self,
    builder: RequestBuilder,
  ) -> Result<Option<T>, ClassifiedError> {
    let builder = match self.auth.token().await {
      Some(token) => builder.bearer_auth(token),
      None => builder,
    };
    let request = builder
      .build()
      .map_err(|e| classify(&RawFailure::from(&e)))?;
    let method = request.method().clone();
    let url = request.url().clone();
    debug!(%method, %url, "Sending request");

    let response = self.http.execute(request).await.map_err(|e| {
      debug!(%method, %url, error = %e, "Request did not complete");
      classify(&RawFailure::from(&e))
    })?;

    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      debug!(%method, %url, status = status.as_u16(), "Request failed");
      return Err(classify(&RawFailure::Http {
        status: status.as_u16(),
        body,
      }));
    }

    let bytes = response
      .bytes()
      .await
      .map_err(|e| classify(&RawFailure::from(&e)))?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
      return Ok(None);
    }

    let envelope: Envelope<T> = serde_json::from_slice(&bytes).map_err(|e| {
      warn!(%method, %url, error = %e, "Undecodable response body");
      classify(&RawFailure::Decode(e.to_string()))
    })?;
    Ok(Some(envelope.into_inner()))
  }

  fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
    self.http.request(method, self.endpoint(segments))
  }

  // ==========================================================================
  // Doctors
  // ==========================================================================

  /// List doctors, optionally filtered by specialty id
  pub async fn get_doctors(&self, specialty: Option<&str>) -> Result<Vec<Doctor>, ClassifiedError> {
    let mut builder = self.request(Method::GET, &["doctors"]);
    if let Some(specialty) = specialty {
      builder = builder.query(&[("specialty", specialty)]);
    }
    let doctors: Vec<ApiDoctor> = self.send(builder).await?;
    Ok(doctors.into_iter().map(Doctor::from).collect())
  }

  pub async fn get_doctor(&self, id: &str) -> Result<Doctor, ClassifiedError> {
    let doctor: ApiDoctor = self.send(self.request(Method::GET, &["doctors", id])).await?;
    Ok(doctor.into())
  }

  /// Open slots for a doctor on one day
  pub async fn get_available_slots(
    &self,
    doctor_id: &str,
    date: NaiveDate,
  ) -> Result<Vec<TimeSlot>, ClassifiedError> {
    let builder = self
      .request(Method::GET, &["doctors", doctor_id, "available-slots"])
      .query(&[("date", date.format("%Y-%m-%d").to_string())]);
    let slots: ApiSlotList = self.send(builder).await?;
    Ok(slots.into_slots())
  }

  pub async fn get_specialties(&self) -> Result<Vec<Specialty>, ClassifiedError> {
    let specialties: Vec<ApiSpecialty> = self.send(self.request(Method::GET, &["specialties"])).await?;
    Ok(specialties.into_iter().map(Specialty::from).collect())
  }

  // ==========================================================================
  // Appointments
  // ==========================================================================

  /// The signed-in patient's appointments. Entries that cannot be understood
  /// are skipped rather than failing the whole list.
  pub async fn get_my_appointments(&self) -> Result<Vec<Appointment>, ClassifiedError> {
    let raw: Vec<ApiAppointment> = self
      .send(self.request(Method::GET, &["appointments", "my"]))
      .await?;

    Ok(
      raw
        .into_iter()
        .filter_map(|api| match Appointment::try_from(api) {
          Ok(appointment) => Some(appointment),
          Err(e) => {
            warn!(error = %e, "Skipping malformed appointment");
            None
          }
        })
        .collect(),
    )
  }

  pub async fn get_appointment(&self, id: &str) -> Result<Appointment, ClassifiedError> {
    let raw: ApiAppointment = self
      .send(self.request(Method::GET, &["appointments", id]))
      .await?;
    to_appointment(raw)
  }

  pub async fn book_appointment(
    &self,
    request: &BookingRequest,
  ) -> Result<Appointment, ClassifiedError> {
    let raw: ApiAppointment = self
      .send(self.request(Method::POST, &["appointments"]).json(request))
      .await?;
    to_appointment(raw)
  }

  /// Cancel an appointment. When the server answers without a body the
  /// appointment is read back.
  pub async fn cancel_appointment(
    &self,
    id: &str,
    reason: Option<&str>,
  ) -> Result<Appointment, ClassifiedError> {
    let builder = self
      .request(Method::PATCH, &["appointments", id, "cancel"])
      .json(&CancelBody { reason });
    match self.send_optional::<ApiAppointment>(builder).await? {
      Some(raw) => to_appointment(raw),
      None => self.get_appointment(id).await,
    }
  }

  // ==========================================================================
  // Profile
  // ==========================================================================

  pub async fn get_profile(&self) -> Result<Profile, ClassifiedError> {
    let profile: ApiProfile = self.send(self.request(Method::GET, &["patients", "me"])).await?;
    Ok(profile.into())
  }

  pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<Profile, ClassifiedError> {
    let builder = self.request(Method::PUT, &["patients", "me"]).json(update);
    match self.send_optional::<ApiProfile>(builder).await? {
      Some(profile) => Ok(profile.into()),
      None => self.get_profile().await,
    }
  }
}

fn to_appointment(raw: ApiAppointment) -> Result<Appointment, ClassifiedError> {
  Appointment::try_from(raw).map_err(|e| classify(&RawFailure::Decode(e)))
}

#[async_trait]
impl ResourceClient for ApiClient {
  async fn fetch_resource(&self, key: &QueryKey) -> Result<Resource, ClassifiedError> {
    let resource = match key {
      QueryKey::Doctors { specialty } => self.get_doctors(specialty.as_deref()).await?.into(),
      QueryKey::Doctor { id } => self.get_doctor(id).await?.into(),
      QueryKey::Specialties => self.get_specialties().await?.into(),
      QueryKey::MyAppointments => self.get_my_appointments().await?.into(),
      QueryKey::Appointment { id } => self.get_appointment(id).await?.into(),
      QueryKey::AvailableSlots { doctor_id, date } => {
        self.get_available_slots(doctor_id, *date).await?.into()
      }
      QueryKey::Profile => self.get_profile().await?.into(),
    };
    Ok(resource)
  }

  async fn mutate_resource(&self, operation: &Operation) -> Result<Resource, ClassifiedError> {
    let resource = match operation {
      Operation::BookAppointment(request) => self.book_appointment(request).await?.into(),
      Operation::CancelAppointment { id, reason } => {
        self.cancel_appointment(id, reason.as_deref()).await?.into()
      }
      Operation::UpdateProfile(update) => self.update_profile(update).await?.into(),
    };
    Ok(resource)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::types::AppointmentStatus;
  use crate::error::ErrorKind;
  use crate::testing::RecordingAuth;
  use serde_json::json;
  use wiremock::matchers::{body_json, header, method, path, query_param};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn client_for(base: &str) -> ApiClient {
    ApiClient::with_base_url(
      Url::parse(base).unwrap(),
      Duration::from_secs(5),
      Arc::new(RecordingAuth::default()),
    )
    .unwrap()
  }

  #[test]
  fn test_endpoint_keeps_base_path() {
    let with_slash = client_for("https://api.example.com/v1/");
    let without_slash = client_for("https://api.example.com/v1");
    for client in [with_slash, without_slash] {
      assert_eq!(
        client.endpoint(&["appointments", "my"]).as_str(),
        "https://api.example.com/v1/appointments/my"
      );
    }
  }

  #[test]
  fn test_endpoint_escapes_segments() {
    let client = client_for("https://api.example.com");
    assert_eq!(
      client.endpoint(&["doctors", "a/b"]).as_str(),
      "https://api.example.com/doctors/a%2Fb"
    );
  }

  #[tokio::test]
  async fn test_sends_bearer_token_and_unwraps_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/appointments/my"))
      .and(header("authorization", "Bearer test-token"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "data": [{
          "_id": 42,
          "doctor": {"id": "d1", "firstName": "Li", "lastName": "Chen"},
          "status": "confirmed",
          "appointmentDate": "2026-11-02T09:30:00Z"
        }]
      })))
      .mount(&server)
      .await;

    let client = client_for(&server.uri());
    let appointments = client.get_my_appointments().await.unwrap();

    assert_eq!(appointments.len(), 1);
    assert_eq!(appointments[0].id, "42");
    assert_eq!(appointments[0].doctor_name.as_deref(), Some("Li Chen"));
    assert_eq!(appointments[0].status, AppointmentStatus::Confirmed);
  }

  #[tokio::test]
  async fn test_doctors_filtered_by_specialty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/doctors"))
      .and(query_param("specialty", "3"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!([
        {"id": "d1", "name": "Dr. Chen", "specialty": "Cardiology", "fee": 80.0}
      ])))
      .mount(&server)
      .await;

    let client = client_for(&server.uri());
    let resource = client
      .fetch_resource(&QueryKey::Doctors {
        specialty: Some("3".into()),
      })
      .await
      .unwrap();

    let Resource::Doctors(doctors) = resource else {
      panic!("expected doctors");
    };
    assert_eq!(doctors[0].name, "Dr. Chen");
    assert_eq!(doctors[0].specialty.as_ref().map(|s| s.name.as_str()), Some("Cardiology"));
    assert_eq!(doctors[0].consultation_fee, Some(80.0));
  }

  #[tokio::test]
  async fn test_slots_request_carries_date() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/doctors/d1/available-slots"))
      .and(query_param("date", "2026-11-03"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "slots": ["2026-11-03T09:00:00Z", {"startTime": "2026-11-03T09:30:00Z", "isAvailable": false}]
      })))
      .mount(&server)
      .await;

    let client = client_for(&server.uri());
    let slots = client
      .get_available_slots("d1", NaiveDate::from_ymd_opt(2026, 11, 3).unwrap())
      .await
      .unwrap();

    assert_eq!(slots.len(), 2);
    assert!(slots[0].available);
    assert!(!slots[1].available);
  }

  #[tokio::test]
  async fn test_unauthorized_is_classified() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/patients/me"))
      .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "Token expired"})))
      .mount(&server)
      .await;

    let client = client_for(&server.uri());
    let err = client.fetch_resource(&QueryKey::Profile).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::Unauthorized);
    assert_eq!(err.http_status, 401);
    assert_eq!(err.message, "Token expired");
    assert!(!err.retryable);
  }

  #[tokio::test]
  async fn test_validation_errors_are_flattened() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/appointments"))
      .respond_with(ResponseTemplate::new(422).set_body_json(json!({
        "errors": {"appointmentDate": ["is in the past"]}
      })))
      .mount(&server)
      .await;

    let client = client_for(&server.uri());
    let request = BookingRequest {
      doctor_id: "d1".into(),
      scheduled_at: "2020-01-01T09:00:00Z".parse().unwrap(),
      reason: None,
      patient: None,
    };
    let err = client
      .mutate_resource(&Operation::BookAppointment(request))
      .await
      .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Validation);
    assert!(err.message.contains("is in the past"));
  }

  #[tokio::test]
  async fn test_cancel_sends_reason() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
      .and(path("/appointments/a1/cancel"))
      .and(body_json(json!({"reason": "travel"})))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "id": "a1",
        "doctorId": "d1",
        "status": "CANCELLED",
        "appointmentDate": "2026-11-02T09:30:00Z",
        "cancellationReason": "travel"
      })))
      .mount(&server)
      .await;

    let client = client_for(&server.uri());
    let cancelled = client.cancel_appointment("a1", Some("travel")).await.unwrap();

    assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
    assert_eq!(cancelled.cancellation_reason.as_deref(), Some("travel"));
  }

  #[tokio::test]
  async fn test_server_error_is_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/specialties"))
      .respond_with(ResponseTemplate::new(503))
      .mount(&server)
      .await;

    let client = client_for(&server.uri());
    let err = client.get_specialties().await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::ServerError);
    assert!(err.retryable);
  }

  #[tokio::test]
  async fn test_undecodable_body_is_unknown() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/specialties"))
      .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
      .mount(&server)
      .await;

    let client = client_for(&server.uri());
    let err = client.get_specialties().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Unknown);
  }

  #[tokio::test]
  async fn test_connection_refused_is_unreachable() {
    let client = client_for("http://127.0.0.1:1");
    let err = client.get_specialties().await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::NetworkUnreachable);
    assert_eq!(err.http_status, 0);
    assert!(err.retryable);
    assert!(!err.request_sent);
  }
}
