use color_eyre::{eyre::eyre, Result};
use crossterm::cursor::MoveTo;
use crossterm::event::{DisableFocusChange, EnableFocusChange, KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, Clear, ClearType};
use crossterm::{execute, queue};
use std::io::{stdout, Write};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::api::types::{Appointment, Doctor, Profile, Specialty, TimeSlot};
use crate::api::{ApiClient, Resource, TokenStore};
use crate::cache::{CacheStore, PolicyTable, QueryKey};
use crate::commands::{self, Command};
use crate::config::Config;
use crate::event::{Event, EventHandler};
use crate::mutation::MutationCoordinator;
use crate::query::Query;
use crate::sync::{Lifecycle, Synchronizer};

/// Main application state
pub struct App {
  /// Application configuration
  config: Config,

  /// Session token, also the auth collaborator for the store
  tokens: Arc<TokenStore>,

  store: CacheStore,
  mutations: MutationCoordinator,
  sync: Synchronizer,

  /// Periodic cache sweep
  gc: JoinHandle<()>,
}

impl App {
  pub fn new(config: Config, tokens: Arc<TokenStore>) -> Result<Self> {
    let client = Arc::new(ApiClient::new(&config, tokens.clone())?);
    let store = CacheStore::new(client, tokens.clone(), PolicyTable::default());
    let gc = store.spawn_gc(config.sync.gc_interval());

    Ok(Self {
      mutations: MutationCoordinator::new(store.clone()),
      sync: Synchronizer::new(store.clone()),
      config,
      tokens,
      store,
      gc,
    })
  }

  pub async fn run(&mut self, command: Command) -> Result<()> {
    if command.is_session() {
      return commands::run_session(&self.tokens, &command);
    }
    if !self.tokens.is_signed_in() {
      return Err(eyre!("Not signed in. Run `medbook login <token>` first."));
    }

    match &command {
      Command::Doctors { specialty } => {
        let doctors: Vec<Doctor> = self
          .load(QueryKey::Doctors {
            specialty: specialty.clone(),
          })
          .await?;
        print_lines(doctors.iter().map(commands::doctor_line));
      }
      Command::Doctor { id } => {
        let doctor: Doctor = self.load(QueryKey::Doctor { id: id.clone() }).await?;
        print_lines(commands::doctor_details(&doctor));
      }
      Command::Slots { doctor, date } => {
        let slots: Vec<TimeSlot> = self
          .load(QueryKey::AvailableSlots {
            doctor_id: doctor.clone(),
            date: *date,
          })
          .await?;
        if slots.is_empty() {
          println!("No slots on {}.", date);
        }
        print_lines(slots.iter().map(commands::slot_line));
      }
      Command::Specialties => {
        let specialties: Vec<Specialty> = self.load(QueryKey::Specialties).await?;
        print_lines(specialties.iter().map(commands::specialty_line));
      }
      Command::Appointments => {
        let appointments: Vec<Appointment> = self.load(QueryKey::MyAppointments).await?;
        if appointments.is_empty() {
          println!("No appointments.");
        }
        print_lines(appointments.iter().map(commands::appointment_line));
      }
      Command::Book { .. } => {
        let request = command
          .booking_request()
          .ok_or_else(|| eyre!("Invalid booking"))?;
        let booked = self
          .mutations
          .book_appointment(request)
          .await
          .map_err(|e| eyre!("Booking failed: {}", e.message))?;
        info!(id = %booked.id, "Booked appointment");
        println!("Booked: {}", commands::appointment_line(&booked));
      }
      Command::Cancel { id, reason } => {
        let cancelled = self
          .mutations
          .cancel_appointment(id, reason.clone())
          .await
          .map_err(|e| eyre!("Cancel failed: {}", e.message))?;
        println!("Cancelled: {}", commands::appointment_line(&cancelled));
      }
      Command::Profile { .. } => {
        let profile: Profile = match command.profile_update() {
          Some(update) => self
            .mutations
            .update_profile(update)
            .await
            .map_err(|e| eyre!("Profile update failed: {}", e.message))?,
          None => self.load(QueryKey::Profile).await?,
        };
        print_lines(commands::profile_lines(&profile));
      }
      Command::Watch => self.watch().await?,
      Command::Login { .. } | Command::Logout => {}
    }

    Ok(())
  }

  /// Read a key through the cache and convert it to the expected type.
  async fn load<T>(&self, key: QueryKey) -> Result<T>
  where
    T: TryFrom<Resource, Error = Resource>,
  {
    let resource = self.store.fetch(&key).await.map_err(|e| eyre!("{}", e.message))?;
    T::try_from(resource).map_err(|other| eyre!("Unexpected {} response for {}", other.kind(), key))
  }

  // ==========================================================================
  // Watch
  // ==========================================================================

  async fn watch(&mut self) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    execute!(stdout(), EnableFocusChange)?;

    let result = self.watch_loop().await;

    // Cleanup terminal
    self.sync.set_lifecycle(Lifecycle::Background);
    execute!(stdout(), DisableFocusChange)?;
    disable_raw_mode()?;

    result
  }

  async fn watch_loop(&mut self) -> Result<()> {
    let mut events = EventHandler::new(self.config.sync.tick_rate());
    let mut query: Query<Vec<Appointment>> = Query::new(&self.store, QueryKey::MyAppointments);

    // Terminals that do not report focus never send FocusGained
    self.sync.set_lifecycle(Lifecycle::Foreground);
    self.draw(&query)?;

    while let Some(event) = events.next().await {
      match event {
        Event::Key(key) => {
          if is_quit(&key) {
            break;
          }
          if key.code == KeyCode::Char('r') {
            query.refetch();
            self.draw(&query)?;
          }
        }
        Event::Lifecycle(lifecycle) => {
          self.sync.set_lifecycle(lifecycle);
          self.draw(&query)?;
        }
        Event::Tick => {
          if query.poll() {
            self.draw(&query)?;
          }
        }
      }
    }

    Ok(())
  }

  fn draw(&self, query: &Query<Vec<Appointment>>) -> Result<()> {
    let mut out = stdout();
    queue!(out, Clear(ClearType::All), MoveTo(0, 0))?;
    for line in commands::watch_screen(query.state(), self.sync.lifecycle()) {
      // raw mode: no implicit carriage return
      write!(out, "{}\r\n", line)?;
    }
    out.flush()?;
    Ok(())
  }
}

impl Drop for App {
  fn drop(&mut self) {
    self.gc.abort();
  }
}

fn is_quit(key: &KeyEvent) -> bool {
  match key.code {
    KeyCode::Char('q') | KeyCode::Esc => true,
    KeyCode::Char('c') => key.modifiers.contains(KeyModifiers::CONTROL),
    _ => false,
  }
}

fn print_lines<I>(lines: I)
where
  I: IntoIterator<Item = String>,
{
  for line in lines {
    println!("{}", line);
  }
}
