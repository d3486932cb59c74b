//! Broadcast module for live market data fan-out

mod handlers;
mod hub;

pub use hub::{
    BroadcastHub, FeedEvent, HeartbeatEvent, LtpEvent, Subscription, SubscriptionMode, TickEvent,
    Topic,
};
