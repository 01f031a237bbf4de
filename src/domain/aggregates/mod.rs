//! Aggregates module
pub mod product;
pub mod cart;
pub mod checkout;
pub mod order;
pub mod booking;

pub use product::{Product, ProductImage, ProductVariant};
pub use cart::{effective_price, Cart, CartError, CartLine};
pub use checkout::{
    CardPaymentSucceeded, CheckoutError, CheckoutForm, CheckoutSession, CheckoutStep, ContactDetails,
    PaymentIntentState, PaymentMethod, PaymentRequest, PaymentSubmission, ShippingMethod,
};
pub use order::{Address, CustomerInfo, NewOrder, Order, OrderError, OrderItem, OrderStatus, OrderTotals, PaymentStatus};
pub use booking::{
    Appointment, AppointmentStatus, BookingDraft, BookingError, BookingFlow, BookingReference, BookingRequest,
    BookingStep, ClientContact, Service, StaffMember, WorkingHours,
};
