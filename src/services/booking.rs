//! Appointment booking desk
//!
//! Holds the service menu, the staff roster and the appointment book. Submissions
//! are checked against the book before a reference is issued.

use chrono::{NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use crate::domain::aggregates::booking::{
    available_slots, is_slot_available, Appointment, AppointmentStatus, BookingError, BookingFlow,
    BookingReference, BookingRequest, Service, StaffMember,
};
use crate::domain::events::{BookingEvent, DomainEvent};
use crate::services::EventBus;
use crate::storage::{keys, load_or_default, save, SharedStore};

/// Free start times for one staff member.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffSlots {
    pub staff_id: String,
    pub staff_name: String,
    pub slots: Vec<NaiveTime>,
}

#[derive(Debug)]
pub struct BookingDesk {
    store: SharedStore,
    services: Vec<Service>,
    staff: Vec<StaffMember>,
    appointments: Mutex<Vec<Appointment>>,
    submit_delay: Duration,
    bus: EventBus,
}

impl BookingDesk {
    /// Reads services, staff and appointments from storage. Missing keys yield empty lists.
    pub fn open(store: SharedStore, submit_delay: Duration, bus: EventBus) -> Self {
        let services: Vec<Service> = load_or_default(store.as_ref(), keys::SERVICES);
        let staff: Vec<StaffMember> = load_or_default(store.as_ref(), keys::STAFF);
        let appointments: Vec<Appointment> = load_or_default(store.as_ref(), keys::APPOINTMENTS);
        if services.is_empty() || staff.is_empty() {
            warn!(services = services.len(), staff = staff.len(), "booking catalog is incomplete");
        }
        Self { store, services, staff, appointments: Mutex::new(appointments), submit_delay, bus }
    }

    pub fn services(&self) -> &[Service] { &self.services }
    pub fn staff(&self) -> &[StaffMember] { &self.staff }

    pub async fn appointments(&self) -> Vec<Appointment> { self.appointments.lock().await.clone() }

    fn service(&self, id: &str) -> Result<&Service, BookingError> {
        self.services.iter().find(|s| s.id == id).ok_or_else(|| BookingError::UnknownService(id.to_string()))
    }

    /// The named staff member, or the whole roster when none is named.
    fn candidates(&self, staff_id: Option<&str>) -> Result<Vec<&StaffMember>, BookingError> {
        match staff_id {
            Some(id) => self.staff.iter().find(|s| s.id == id)
                .map(|s| vec![s])
                .ok_or_else(|| BookingError::UnknownStaff(id.to_string())),
            None => Ok(self.staff.iter().collect()),
        }
    }

    /// Free slots for `service_id` on `date`, per staff member.
    pub async fn available_slots(&self, service_id: &str, staff_id: Option<&str>, date: NaiveDate) -> Result<Vec<StaffSlots>, BookingError> {
        let duration = self.service(service_id)?.duration();
        let candidates = self.candidates(staff_id)?;
        let book = self.appointments.lock().await;
        Ok(candidates
            .into_iter()
            .map(|s| StaffSlots {
                staff_id: s.id.clone(),
                staff_name: s.name.clone(),
                slots: available_slots(s, date, duration, &book),
            })
            .collect())
    }

    /// Submits the flow's draft. The flow stays on the contact step on failure and can
    /// be submitted again.
    #[instrument(skip_all)]
    pub async fn submit(&self, flow: &mut BookingFlow) -> Result<Appointment, BookingError> {
        let request = flow.begin_submit()?;
        tokio::time::sleep(self.submit_delay).await;
        match self.book(request).await {
            Ok(appointment) => {
                flow.confirm(appointment.reference.clone());
                Ok(appointment)
            }
            Err(e) => {
                flow.submission_failed();
                Err(e)
            }
        }
    }

    async fn book(&self, request: BookingRequest) -> Result<Appointment, BookingError> {
        let service = self.service(&request.service_id)?;
        let duration = service.duration();
        let candidates = self.candidates(request.staff_id.as_deref())?;

        let mut book = self.appointments.lock().await;
        let staff = candidates
            .into_iter()
            .find(|s| is_slot_available(s, request.date, request.time, duration, &book))
            .ok_or(BookingError::SlotUnavailable { date: request.date, time: request.time })?;

        let appointment = Appointment {
            id: Uuid::new_v4().to_string(),
            reference: BookingReference::generate(&mut rand::thread_rng()),
            service_id: service.id.clone(),
            staff_id: staff.id.clone(),
            date: request.date,
            start: request.time,
            end: request.time + duration,
            status: AppointmentStatus::Scheduled,
            client: request.contact,
            notes: request.notes,
            created_at: Utc::now(),
        };
        book.push(appointment.clone());
        if let Err(e) = save(self.store.as_ref(), keys::APPOINTMENTS, book.as_slice()) {
            warn!(error = %e, "failed to persist appointments");
        }
        drop(book);

        info!(reference = %appointment.reference, staff_id = %appointment.staff_id, "appointment booked");
        self.bus.publish(vec![DomainEvent::Booking(BookingEvent::Confirmed {
            reference: appointment.reference.clone(),
            staff_id: appointment.staff_id.clone(),
        })]);
        Ok(appointment)
    }
}
