//! Booking Aggregate
//!
//! Appointment booking runs `service -> dateTime -> contact -> success`. Slot
//! availability is decided against staff working hours and the appointments
//! already on the book.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Minutes between candidate start times when listing slots.
pub const SLOT_INTERVAL_MINUTES: i64 = 30;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    pub name: String,
    pub duration_minutes: u32,
    pub price: Decimal,
}

impl Service {
    pub fn duration(&self) -> Duration { Duration::minutes(i64::from(self.duration_minutes)) }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkingHours {
    pub weekday: Weekday,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffMember {
    pub id: String,
    pub name: String,
    pub working_hours: Vec<WorkingHours>,
}

impl StaffMember {
    pub fn hours_on(&self, date: NaiveDate) -> Option<&WorkingHours> {
        let weekday = date.weekday();
        self.working_hours.iter().find(|h| h.weekday == weekday)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AppointmentStatus { #[default] Scheduled, Confirmed, Completed, Cancelled, NoShow }

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContact {
    pub name: String,
    pub email: String,
    pub phone: String,
}

impl ClientContact {
    pub fn is_complete(&self) -> bool {
        [&self.name, &self.email, &self.phone].iter().all(|f| !f.trim().is_empty())
    }
}

/// Human-facing booking reference of the form `BK-######`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BookingReference(String);

impl BookingReference {
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self(format!("BK-{:06}", rng.gen_range(0..1_000_000u32)))
    }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for BookingReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: String,
    pub reference: BookingReference,
    pub service_id: String,
    pub staff_id: String,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub status: AppointmentStatus,
    pub client: ClientContact,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Appointment {
    /// Half-open overlap of `[start, end)` against this appointment on the same day.
    pub fn overlaps(&self, date: NaiveDate, start: NaiveTime, end: NaiveTime) -> bool {
        self.date == date && start < self.end && self.start < end
    }

    pub fn blocks_slots(&self) -> bool { self.status != AppointmentStatus::Cancelled }
}

/// End of a slot starting at `start`, or `None` if it would run past midnight.
fn slot_end(start: NaiveTime, duration: Duration) -> Option<NaiveTime> {
    let (end, wrapped) = start.overflowing_add_signed(duration);
    (wrapped == 0).then_some(end)
}

/// A slot is free iff it lies within the staff member's hours for that weekday and
/// overlaps no non-cancelled appointment of theirs.
pub fn is_slot_available(
    staff: &StaffMember,
    date: NaiveDate,
    start: NaiveTime,
    duration: Duration,
    appointments: &[Appointment],
) -> bool {
    let Some(hours) = staff.hours_on(date) else { return false };
    let Some(end) = slot_end(start, duration) else { return false };
    if start < hours.start || end > hours.end { return false; }
    !appointments
        .iter()
        .filter(|a| a.staff_id == staff.id && a.blocks_slots())
        .any(|a| a.overlaps(date, start, end))
}

/// Free start times on a [`SLOT_INTERVAL_MINUTES`] grid from the start of the working day.
pub fn available_slots(
    staff: &StaffMember,
    date: NaiveDate,
    duration: Duration,
    appointments: &[Appointment],
) -> Vec<NaiveTime> {
    let Some(hours) = staff.hours_on(date) else { return vec![] };
    let step = Duration::minutes(SLOT_INTERVAL_MINUTES);
    let mut slots = vec![];
    let mut cursor = hours.start;
    while cursor < hours.end {
        if is_slot_available(staff, date, cursor, duration, appointments) { slots.push(cursor); }
        match slot_end(cursor, step) {
            Some(next) if next > cursor => cursor = next,
            _ => break,
        }
    }
    slots
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BookingStep { #[default] Service, DateTime, Contact, Success }

impl BookingStep {
    fn next(self) -> Option<Self> {
        match self {
            Self::Service => Some(Self::DateTime),
            Self::DateTime => Some(Self::Contact),
            Self::Contact | Self::Success => None,
        }
    }

    fn previous(self) -> Option<Self> {
        match self {
            Self::DateTime => Some(Self::Service),
            Self::Contact => Some(Self::DateTime),
            Self::Service | Self::Success => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingDraft {
    pub service_id: Option<String>,
    #[serde(default)]
    pub staff_id: Option<String>,
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
    #[serde(default)]
    pub contact: ClientContact,
    #[serde(default)]
    pub notes: Option<String>,
}

/// A complete draft, ready to be checked against the appointment book.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BookingRequest {
    pub service_id: String,
    pub staff_id: Option<String>,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub contact: ClientContact,
    pub notes: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingFlow {
    step: BookingStep,
    draft: BookingDraft,
    reference: Option<BookingReference>,
    submitting: bool,
}

impl BookingFlow {
    pub fn new() -> Self { Self::default() }

    /// Resumes a flow from a filled-in draft, advancing as far as the draft allows.
    pub fn from_draft(draft: BookingDraft) -> Self {
        let mut flow = Self { draft, ..Self::default() };
        while flow.next().is_ok() {}
        flow
    }

    pub fn step(&self) -> BookingStep { self.step }
    pub fn draft(&self) -> &BookingDraft { &self.draft }
    pub fn reference(&self) -> Option<&BookingReference> { self.reference.as_ref() }
    pub fn is_submitting(&self) -> bool { self.submitting }

    pub fn select_service(&mut self, service_id: impl Into<String>) { self.draft.service_id = Some(service_id.into()); }
    pub fn select_staff(&mut self, staff_id: Option<String>) { self.draft.staff_id = staff_id; }
    pub fn select_date(&mut self, date: NaiveDate) { self.draft.date = Some(date); }
    pub fn select_time(&mut self, time: NaiveTime) { self.draft.time = Some(time); }
    pub fn set_contact(&mut self, contact: ClientContact) { self.draft.contact = contact; }
    pub fn set_notes(&mut self, notes: Option<String>) { self.draft.notes = notes; }

    pub fn is_step_complete(&self, step: BookingStep) -> bool {
        match step {
            BookingStep::Service => self.draft.service_id.is_some(),
            BookingStep::DateTime => self.draft.date.is_some() && self.draft.time.is_some(),
            BookingStep::Contact => self.draft.contact.is_complete(),
            BookingStep::Success => self.reference.is_some(),
        }
    }

    pub fn next(&mut self) -> Result<BookingStep, BookingError> {
        let Some(next) = self.step.next() else { return Err(BookingError::NoNextStep(self.step)) };
        if !self.is_step_complete(self.step) { return Err(BookingError::IncompleteStep(self.step)); }
        self.step = next;
        Ok(next)
    }

    pub fn back(&mut self) -> Result<BookingStep, BookingError> {
        if self.submitting { return Err(BookingError::SubmissionInProgress); }
        let Some(previous) = self.step.previous() else { return Err(BookingError::NoPreviousStep(self.step)) };
        self.step = previous;
        Ok(previous)
    }

    /// Starts submission; a second call before the outcome is recorded is rejected.
    pub fn begin_submit(&mut self) -> Result<BookingRequest, BookingError> {
        if self.step != BookingStep::Contact { return Err(BookingError::WrongStep(self.step)); }
        if self.submitting { return Err(BookingError::SubmissionInProgress); }
        let (Some(service_id), Some(date), Some(time)) = (self.draft.service_id.clone(), self.draft.date, self.draft.time) else {
            return Err(BookingError::IncompleteStep(BookingStep::DateTime));
        };
        if !self.draft.contact.is_complete() { return Err(BookingError::IncompleteStep(BookingStep::Contact)); }
        self.submitting = true;
        Ok(BookingRequest {
            service_id, staff_id: self.draft.staff_id.clone(), date, time,
            contact: self.draft.contact.clone(), notes: self.draft.notes.clone(),
        })
    }

    pub fn submission_failed(&mut self) { self.submitting = false; }

    pub fn confirm(&mut self, reference: BookingReference) {
        self.submitting = false;
        self.reference = Some(reference);
        self.step = BookingStep::Success;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BookingError {
    #[error("Step {0:?} is not complete")]
    IncompleteStep(BookingStep),
    #[error("No step after {0:?}")]
    NoNextStep(BookingStep),
    #[error("No step before {0:?}")]
    NoPreviousStep(BookingStep),
    #[error("Booking can only be submitted from the contact step, not {0:?}")]
    WrongStep(BookingStep),
    #[error("Booking is already being submitted")]
    SubmissionInProgress,
    #[error("Unknown service {0}")]
    UnknownService(String),
    #[error("Unknown staff member {0}")]
    UnknownStaff(String),
    #[error("No staff member is available on {date} at {time}")]
    SlotUnavailable { date: NaiveDate, time: NaiveTime },
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn t(h: u32, m: u32) -> NaiveTime { NaiveTime::from_hms_opt(h, m, 0).unwrap() }

    /// A Monday.
    pub fn monday() -> NaiveDate { NaiveDate::from_ymd_opt(2026, 10, 19).unwrap() }

    pub fn staff(id: &str) -> StaffMember {
        StaffMember {
            id: id.into(),
            name: format!("Staff {id}"),
            working_hours: [Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri]
                .into_iter()
                .map(|weekday| WorkingHours { weekday, start: t(9, 0), end: t(17, 0) })
                .collect(),
        }
    }

    pub fn service(id: &str, minutes: u32) -> Service {
        Service { id: id.into(), name: format!("Service {id}"), duration_minutes: minutes, price: Decimal::new(40, 0) }
    }

    pub fn appointment(staff_id: &str, date: NaiveDate, start: NaiveTime, end: NaiveTime) -> Appointment {
        Appointment {
            id: format!("{staff_id}-{start}"), reference: BookingReference("BK-000001".into()),
            service_id: "cut".into(), staff_id: staff_id.into(), date, start, end,
            status: AppointmentStatus::Scheduled, client: ClientContact::default(), notes: None,
            created_at: Utc::now(),
        }
    }

    pub fn contact() -> ClientContact {
        ClientContact { name: "Grace".into(), email: "grace@example.com".into(), phone: "555-0101".into() }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_slot_within_working_hours() {
        let s = staff("s1");
        let hour = Duration::minutes(60);
        assert!(is_slot_available(&s, monday(), t(9, 0), hour, &[]));
        assert!(is_slot_available(&s, monday(), t(16, 0), hour, &[]));
        assert!(!is_slot_available(&s, monday(), t(16, 30), hour, &[]));
        assert!(!is_slot_available(&s, monday(), t(8, 30), hour, &[]));
        let sunday = monday() - Duration::days(1);
        assert!(!is_slot_available(&s, sunday, t(10, 0), hour, &[]));
    }

    #[test]
    fn test_slot_conflicts_are_half_open() {
        let s = staff("s1");
        let booked = vec![appointment("s1", monday(), t(10, 0), t(11, 0))];
        let hour = Duration::minutes(60);
        assert!(!is_slot_available(&s, monday(), t(10, 30), hour, &booked));
        assert!(!is_slot_available(&s, monday(), t(9, 30), hour, &booked));
        assert!(is_slot_available(&s, monday(), t(11, 0), hour, &booked));
        assert!(is_slot_available(&s, monday(), t(9, 0), hour, &booked));
    }

    #[test]
    fn test_cancelled_and_other_staff_do_not_block() {
        let s = staff("s1");
        let mut cancelled = appointment("s1", monday(), t(10, 0), t(11, 0));
        cancelled.status = AppointmentStatus::Cancelled;
        let other = appointment("s2", monday(), t(10, 0), t(11, 0));
        assert!(is_slot_available(&s, monday(), t(10, 0), Duration::minutes(60), &[cancelled, other]));
    }

    #[test]
    fn test_available_slots_grid() {
        let s = staff("s1");
        let booked = vec![appointment("s1", monday(), t(9, 0), t(16, 0))];
        let slots = available_slots(&s, monday(), Duration::minutes(45), &booked);
        assert_eq!(slots, vec![t(16, 0)]);
        assert_eq!(available_slots(&s, monday(), Duration::minutes(60), &[]).len(), 15);
    }

    #[test]
    fn test_step_two_needs_date_and_time() {
        let mut flow = BookingFlow::new();
        flow.select_service("cut");
        flow.next().unwrap();
        flow.select_date(monday());
        assert!(!flow.is_step_complete(BookingStep::DateTime));
        assert_eq!(flow.next(), Err(BookingError::IncompleteStep(BookingStep::DateTime)));

        let mut only_time = BookingFlow::new();
        only_time.select_time(t(10, 0));
        assert!(!only_time.is_step_complete(BookingStep::DateTime));

        flow.select_time(t(10, 0));
        assert!(flow.is_step_complete(BookingStep::DateTime));
        assert_eq!(flow.next(), Ok(BookingStep::Contact));
    }

    #[test]
    fn test_cannot_skip_ahead() {
        let mut flow = BookingFlow::new();
        assert_eq!(flow.next(), Err(BookingError::IncompleteStep(BookingStep::Service)));
        assert_eq!(flow.back(), Err(BookingError::NoPreviousStep(BookingStep::Service)));
        assert_eq!(flow.begin_submit(), Err(BookingError::WrongStep(BookingStep::Service)));
    }

    #[test]
    fn test_contact_and_double_submit() {
        let mut flow = BookingFlow::from_draft(BookingDraft {
            service_id: Some("cut".into()), date: Some(monday()), time: Some(t(10, 0)), ..Default::default()
        });
        assert_eq!(flow.step(), BookingStep::Contact);
        flow.set_contact(ClientContact { phone: " ".into(), ..contact() });
        assert_eq!(flow.begin_submit(), Err(BookingError::IncompleteStep(BookingStep::Contact)));
        flow.set_contact(contact());
        let request = flow.begin_submit().unwrap();
        assert_eq!(request.service_id, "cut");
        assert_eq!(flow.begin_submit(), Err(BookingError::SubmissionInProgress));
        flow.submission_failed();
        assert!(flow.begin_submit().is_ok());
        flow.confirm(BookingReference::generate(&mut StdRng::seed_from_u64(7)));
        assert_eq!(flow.step(), BookingStep::Success);
    }

    #[test]
    fn test_reference_format() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..50 {
            let r = BookingReference::generate(&mut rng);
            assert_eq!(r.as_str().len(), 9);
            assert!(r.as_str().starts_with("BK-"));
            assert!(r.as_str()[3..].chars().all(|c| c.is_ascii_digit()));
        }
    }
}
