// Copyright 2023-, Semiotic AI, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Domain values exchanged with the backend and kept in the device cache.

mod customer_info;
mod log_in;
mod offerings;
mod subscriber_attribute;

pub use customer_info::{
    CustomerInfo, EntitlementInfo, NonSubscriptionTransaction, Subscriber, SubscriptionInfo,
};
pub use log_in::LogInResponse;
pub use offerings::{Offering, Offerings, Package};
pub(crate) use subscriber_attribute::attributes_to_backend_json;
pub use subscriber_attribute::{SubscriberAttribute, SubscriberAttributes};
