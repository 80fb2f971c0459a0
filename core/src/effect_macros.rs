//! Declarative macros for ergonomic effect construction
//!
//! These macros reduce boilerplate when creating `Effect` variants, particularly
//! for bus operations.

/// Create an `Effect::Publish` operation
///
/// # Example
///
/// ```rust,ignore
/// use booking_core::publish;
///
/// publish! {
///     bus: env.bus,
///     route: Route::direct(RENTAL_AGENT_KEY),
///     envelope: reply,
///     on_success: || None,
///     on_error: |error| Some(BuildingAction::ReplyLost { error: error.to_string() })
/// }
/// ```
///
/// The short form leaves both callbacks empty:
///
/// ```rust,ignore
/// publish!(env.bus, Route::Fanout, announcement)
/// ```
#[macro_export]
macro_rules! publish {
    (
        bus: $bus:expr,
        route: $route:expr,
        envelope: $envelope:expr,
        on_success: || $success_body:expr,
        on_error: |$error_param:ident| $error_body:expr
    ) => {
        $crate::effect::Effect::Publish(
            $crate::effect::BusOperation::Publish {
                bus: ::std::sync::Arc::clone(&$bus),
                route: $route,
                envelope: $envelope,
                on_success: ::std::boxed::Box::new(move |()| $success_body),
                on_error: ::std::boxed::Box::new(move |$error_param| $error_body),
            }
        )
    };
    ($bus:expr, $route:expr, $envelope:expr $(,)?) => {
        $crate::publish! {
            bus: $bus,
            route: $route,
            envelope: $envelope,
            on_success: || None,
            on_error: |_error| None
        }
    };
}

/// Create an `Effect::Future` from an async block
///
/// # Example
///
/// ```rust,ignore
/// use booking_core::async_effect;
///
/// async_effect! {
///     match supervisor.start(setup.clone()).await {
///         Ok(()) => Some(RegistryAction::Started { setup }),
///         Err(e) => Some(RegistryAction::StartFailed { id, reason: e.to_string() }),
///     }
/// }
/// ```
#[macro_export]
macro_rules! async_effect {
    ($($body:tt)*) => {
        $crate::effect::Effect::Future(
            ::std::boxed::Box::pin(async move { $($body)* })
        )
    };
}
