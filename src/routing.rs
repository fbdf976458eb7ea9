//! Event routing: the upload trigger and the failure path.
//!
//! Two paths are wired on top of the graph:
//!
//! ```text
//! upload ──▶ source bucket ──(object created)──▶ function
//!                                                   │ fails after retries
//!                                                   ▼
//!                                 failure topic ──▶ email subscription
//! ```
//!
//! The failure path is the only failure signal the system has. The uploader
//! gets no error back; a failed invocation is retried up to the configured
//! attempts and event age, then forwarded to the topic, which delivers to its
//! subscribers at least once and asynchronously.
//!
//! ## Ordering
//!
//! - The topic is declared before the function. The function's
//!   `dead_letter_config` ([`dead_letter_config`]) references the topic, so
//!   the edge function → topic exists before the function is ordered.
//! - The trigger is attached only once both the bucket and the function are
//!   declared in the same stack. The bucket notification also depends
//!   explicitly on the invoke permission, since the provider validates the
//!   destination when the notification is created.
//!
//! [`InvocationState`] models the lifecycle of one invocation so the retry
//! and delivery rules can be checked without a deployment.

use crate::graph::{GraphError, Handle, StackBuilder};
use crate::resource::ResourceKind;
use crate::value::{Config, Value};
use thiserror::Error;

/// Object-created events of every flavour (put, post, copy, multipart).
pub const OBJECT_CREATED: &str = "s3:ObjectCreated:*";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    #[error("maximum_retry_attempts must be 0-{max}, got {got}", max = RetryPolicy::MAX_RETRY_ATTEMPTS)]
    RetryAttempts { got: u32 },
    #[error("maximum_event_age must be {min}-{max} seconds, got {got}", min = RetryPolicy::MIN_EVENT_AGE, max = RetryPolicy::MAX_EVENT_AGE)]
    EventAge { got: u32 },
    #[error("{address} is a {actual}, expected a {expected}")]
    WrongKind {
        address: String,
        actual: ResourceKind,
        expected: ResourceKind,
    },
    #[error("No transition from {from:?} on {event:?}")]
    InvalidTransition {
        from: InvocationState,
        event: InvocationEvent,
    },
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Asynchronous invocation retry limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    maximum_retry_attempts: u32,
    maximum_event_age: u32,
}

impl RetryPolicy {
    pub const MAX_RETRY_ATTEMPTS: u32 = 2;
    pub const MIN_EVENT_AGE: u32 = 60;
    pub const MAX_EVENT_AGE: u32 = 21_600;

    pub fn new(maximum_retry_attempts: u32, maximum_event_age: u32) -> Result<Self, RoutingError> {
        if maximum_retry_attempts > Self::MAX_RETRY_ATTEMPTS {
            return Err(RoutingError::RetryAttempts {
                got: maximum_retry_attempts,
            });
        }
        if !(Self::MIN_EVENT_AGE..=Self::MAX_EVENT_AGE).contains(&maximum_event_age) {
            return Err(RoutingError::EventAge {
                got: maximum_event_age,
            });
        }
        Ok(Self {
            maximum_retry_attempts,
            maximum_event_age,
        })
    }

    pub fn maximum_retry_attempts(&self) -> u32 {
        self.maximum_retry_attempts
    }

    pub fn maximum_event_age(&self) -> u32 {
        self.maximum_event_age
    }
}

/// The failure topic and its subscriptions.
#[derive(Debug, Clone)]
pub struct FailureChannel {
    pub topic: Handle,
    pub subscriptions: Vec<Handle>,
}

/// Declare the failure topic with one email subscription.
pub fn failure_channel(
    stack: &mut StackBuilder,
    name: &str,
    email: &str,
) -> Result<FailureChannel, RoutingError> {
    let topic = stack.declare(ResourceKind::Topic, name, Config::new().set("name", name))?;
    let subscription = stack.declare(
        ResourceKind::Subscription,
        &format!("{name}-email"),
        Config::new()
            .set("topic_arn", topic.arn())
            .set("protocol", "email")
            .set("endpoint", email),
    )?;
    Ok(FailureChannel {
        topic,
        subscriptions: vec![subscription],
    })
}

/// `dead_letter_config` block for a function routed to `channel`.
pub fn dead_letter_config(channel: &FailureChannel) -> Config {
    Config::new().set("target_arn", channel.topic.arn())
}

/// Declare retry limits and the on-failure destination for `function`.
pub fn invoke_config(
    stack: &mut StackBuilder,
    function: &Handle,
    channel: &FailureChannel,
    policy: &RetryPolicy,
) -> Result<Handle, RoutingError> {
    expect_kind(function, ResourceKind::Function)?;
    expect_kind(&channel.topic, ResourceKind::Topic)?;
    let handle = stack.declare(
        ResourceKind::EventInvokeConfig,
        &format!("{}-invoke-config", function.name()),
        Config::new()
            .set("function_name", function.attr("function_name"))
            .set("maximum_retry_attempts", policy.maximum_retry_attempts())
            .set("maximum_event_age_in_seconds", policy.maximum_event_age())
            .set(
                "destination_config",
                Config::new().set(
                    "on_failure",
                    Config::new().set("destination", channel.topic.arn()),
                ),
            ),
    )?;
    Ok(handle)
}

/// Permission and notification that make uploads invoke a function.
#[derive(Debug, Clone)]
pub struct UploadTrigger {
    pub permission: Handle,
    pub notification: Handle,
}

/// Invoke `function` for `events` on `bucket`. Both must already be
/// declared in `stack`.
pub fn upload_trigger(
    stack: &mut StackBuilder,
    bucket: &Handle,
    function: &Handle,
    events: &[&str],
) -> Result<UploadTrigger, RoutingError> {
    expect_kind(bucket, ResourceKind::Bucket)?;
    expect_kind(function, ResourceKind::Function)?;
    stack.check_handle("upload trigger", bucket)?;
    stack.check_handle("upload trigger", function)?;

    let permission = stack.declare(
        ResourceKind::FunctionPermission,
        &format!("{}-invoke-{}", bucket.name(), function.name()),
        Config::new()
            .set("statement_id", "AllowExecutionFromS3Bucket")
            .set("action", "lambda:InvokeFunction")
            .set("function_name", function.attr("function_name"))
            .set("principal", "s3.amazonaws.com")
            .set("source_arn", bucket.arn()),
    )?;
    let notification = stack.declare(
        ResourceKind::EventSource,
        bucket.name(),
        Config::new().set("bucket", bucket.id()).set(
            "lambda_function",
            Value::list([Config::new()
                .set("lambda_function_arn", function.arn())
                .set("events", Value::list(events.iter().copied()))]),
        ),
    )?;
    stack.depends_on(&notification, &permission)?;
    tracing::debug!(bucket = bucket.name(), function = function.name(), "upload trigger attached");
    Ok(UploadTrigger {
        permission,
        notification,
    })
}

fn expect_kind(handle: &Handle, expected: ResourceKind) -> Result<(), RoutingError> {
    if handle.kind() == expected {
        Ok(())
    } else {
        Err(RoutingError::WrongKind {
            address: handle.address(),
            actual: handle.kind(),
            expected,
        })
    }
}

// =============================================================================
// Invocation lifecycle
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    /// Running; `attempt` counts retries already spent.
    Invoked { attempt: u32 },
    Succeeded,
    Failed,
    DeadLettered,
    Notified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationEvent {
    Completed,
    /// The handler failed; `event_age` is seconds since the original event.
    Errored { event_age: u32 },
    /// The failure payload reached the dead-letter topic.
    Forwarded,
    /// The topic delivered to a subscriber. May repeat.
    Delivered,
}

impl InvocationState {
    pub fn start() -> Self {
        Self::Invoked { attempt: 0 }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Notified)
    }

    pub fn next(self, event: InvocationEvent, policy: &RetryPolicy) -> Result<Self, RoutingError> {
        use InvocationEvent as E;
        use InvocationState as S;
        match (self, event) {
            (S::Invoked { .. }, E::Completed) => Ok(S::Succeeded),
            (S::Invoked { attempt }, E::Errored { event_age })
                if attempt < policy.maximum_retry_attempts()
                    && event_age < policy.maximum_event_age() =>
            {
                Ok(S::Invoked {
                    attempt: attempt + 1,
                })
            }
            (S::Invoked { .. }, E::Errored { .. }) => Ok(S::Failed),
            (S::Failed, E::Forwarded) => Ok(S::DeadLettered),
            (S::DeadLettered | S::Notified, E::Delivered) => Ok(S::Notified),
            (from, event) => Err(RoutingError::InvalidTransition { from, event }),
        }
    }
}
