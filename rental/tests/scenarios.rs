//! End-to-end booking flows over the in-memory broker.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

mod common;

use booking_core::bus::{MessageBus, Route};
use booking_core::envelope::{Envelope, REPLY_TO, RESERVATION};
use booking_rental::ClientHandle;
use booking_rental::protocol::{BuildingReply, MessageKind, RENTAL_AGENT_KEY, client_key, text_envelope};
use booking_rental::requester::{LocalStatus, Notice, Tone};
use booking_rental::reservations::ReservationStatus;
use common::{eventually, notice_containing, notices_containing, start, start_with_buildings};

const NUMBER_NOTICE: &str = "Your Reservation Number is: ";

/// Reserve, returning the issued number and the outcome notice containing `outcome`.
async fn reserve(client: &mut ClientHandle, building: &str, room: &str, outcome: &str) -> (String, Notice) {
    client.reserve(building, room).await.unwrap();
    let mut notices = notices_containing(client, &[NUMBER_NOTICE, outcome]).await;
    let outcome = notices.remove(1);
    let number = notices[0].text.strip_prefix(NUMBER_NOTICE).unwrap().to_string();
    (number, outcome)
}

async fn local_status(client: &ClientHandle, number: &str) -> Option<LocalStatus> {
    client
        .reservations()
        .await
        .into_iter()
        .find(|r| r.number == number)
        .map(|r| r.status)
}

#[tokio::test]
async fn registered_building_is_listed_with_free_rooms() {
    let (mut app, _bus) = start_with_buildings(&[2]).await;
    let mut client = app.connect_client("alice").await.unwrap();

    client.list_buildings().await.unwrap();
    let notice = notice_containing(&mut client, "Available buildings").await;

    assert_eq!(notice.tone, Tone::Info);
    assert_eq!(
        notice.text,
        "Available buildings and rooms:\nBuilding-1\n  Room-1: Available\n  Room-2: Available"
    );
    app.shutdown().await.unwrap();
}

#[tokio::test]
async fn empty_system_lists_nothing() {
    let (mut app, _bus) = start().await;
    let mut client = app.connect_client("alice").await.unwrap();

    client.list_buildings().await.unwrap();
    let notice = notice_containing(&mut client, "No buildings").await;

    assert_eq!(notice.text, "No buildings are available yet.");
    app.shutdown().await.unwrap();
}

#[tokio::test]
async fn connected_clients_hear_about_new_buildings() {
    let (mut app, _bus) = start().await;
    let mut client = app.connect_client("alice").await.unwrap();

    app.register_building(3).await.unwrap();
    let notice = notice_containing(&mut client, "Fanout Message Received").await;

    assert_eq!(notice.text, "Fanout Message Received: Building-1 is created!");
    assert_eq!(client.announcements().await, vec!["Building-1 is created!"]);
    app.shutdown().await.unwrap();
}

#[tokio::test]
async fn reservation_is_confirmed_and_room_shows_booked() {
    let (mut app, _bus) = start_with_buildings(&[2]).await;
    let mut client = app.connect_client("alice").await.unwrap();

    let (number, confirmed) = reserve(&mut client, "building-1", "room-1", "confirmed").await;
    assert_eq!(confirmed.tone, Tone::Success);
    assert_eq!(confirmed.text, "The reservation is confirmed for Building-1 Room-1");

    eventually("client sees the confirmation", || {
        let (client, number) = (&client, &number);
        async move { local_status(client, number).await == Some(LocalStatus::Confirmed) }
    })
    .await;
    let status = app
        .agent()
        .state(|s| s.reservations.get(&number).map(|r| r.status))
        .await;
    assert_eq!(status, Some(ReservationStatus::Confirmed));
    assert!(app.workers().snapshot(1).await.unwrap().is_booked("Room-1"));

    client.list_buildings().await.unwrap();
    let listing = notice_containing(&mut client, "Available buildings").await;
    assert!(listing.text.contains("  Room-1: Booked"));
    assert!(listing.text.contains("  Room-2: Available"));
    app.shutdown().await.unwrap();
}

#[tokio::test]
async fn cancelling_frees_the_room_and_drops_the_record() {
    let (mut app, _bus) = start_with_buildings(&[2]).await;
    let mut client = app.connect_client("alice").await.unwrap();
    let (number, _) = reserve(&mut client, "building-1", "room-1", "confirmed").await;

    client.cancel(&number).await.unwrap();
    let cancelled = notice_containing(&mut client, "Reservation cancelled").await;

    assert_eq!(cancelled.text, "Reservation cancelled for Room-1");
    assert!(app.agent().state(|s| s.reservations.get(&number).is_none()).await);
    assert!(!app.workers().snapshot(1).await.unwrap().is_booked("Room-1"));
    eventually("client forgets the reservation", || {
        let client = &client;
        async move { client.reservations().await.is_empty() }
    })
    .await;

    // The number stays retired
    assert!(app.agent().state(|s| s.reservations.was_issued(&number)).await);
    app.shutdown().await.unwrap();
}

#[tokio::test]
async fn unknown_building_creates_no_record() {
    let (mut app, _bus) = start_with_buildings(&[2]).await;
    let mut client = app.connect_client("alice").await.unwrap();

    client.reserve("building-9", "room-1").await.unwrap();
    let notice = notice_containing(&mut client, "does not exist").await;

    assert_eq!(notice.tone, Tone::Failure);
    assert_eq!(notice.text, "The building building-9 does not exist. Input a valid building");
    assert!(app.agent().state(|s| s.reservations.is_empty()).await);
    assert!(client.reservations().await.is_empty());
    app.shutdown().await.unwrap();
}

#[tokio::test]
async fn unknown_room_is_rejected_by_the_building() {
    let (mut app, _bus) = start_with_buildings(&[2]).await;
    let mut client = app.connect_client("alice").await.unwrap();

    let (number, notice) = reserve(&mut client, "building-1", "room-9", "does not exist").await;

    assert_eq!(notice.text, "This room does not exist. Input a valid room");
    eventually("client marks the request rejected", || {
        let (client, number) = (&client, &number);
        async move { local_status(client, number).await == Some(LocalStatus::Rejected) }
    })
    .await;
    // No reconciliation: the agent's record stays pending
    let status = app
        .agent()
        .state(|s| s.reservations.get(&number).map(|r| r.status))
        .await;
    assert_eq!(status, Some(ReservationStatus::Pending));
    app.shutdown().await.unwrap();
}

#[tokio::test]
async fn booking_a_room_twice_is_refused() {
    let (mut app, _bus) = start_with_buildings(&[1]).await;
    let mut alice = app.connect_client("alice").await.unwrap();
    let mut bob = app.connect_client("bob").await.unwrap();

    reserve(&mut alice, "building-1", "room-1", "confirmed").await;

    let (second, refused) = reserve(&mut bob, "Building-1", "ROOM-1", "already booked").await;

    assert_eq!(refused.tone, Tone::Failure);
    assert_eq!(refused.text, "This room is already booked.");
    eventually("bob sees the refusal", || {
        let (bob, second) = (&bob, &second);
        async move { local_status(bob, second).await == Some(LocalStatus::Rejected) }
    })
    .await;
    app.shutdown().await.unwrap();
}

#[tokio::test]
async fn cancelling_an_unknown_number_reaches_no_building() {
    let (mut app, _bus) = start_with_buildings(&[1]).await;
    let mut client = app.connect_client("alice").await.unwrap();

    client.cancel("no-such-number").await.unwrap();
    let notice = notice_containing(&mut client, "cannot be found").await;

    assert_eq!(notice.text, "Reservation no-such-number cannot be found in the system.");
    assert_eq!(app.agent().state(|s| s.in_flight()).await, 0);
    assert!(app.workers().snapshot(1).await.unwrap().booked_rooms().is_empty());
    app.shutdown().await.unwrap();
}

#[tokio::test]
async fn malformed_messages_are_dropped_and_service_continues() {
    let (mut app, bus) = start_with_buildings(&[1]).await;
    let mut client = app.connect_client("alice").await.unwrap();
    let agent = Route::direct(RENTAL_AGENT_KEY);

    // Wrong field count, undecodable payload, unknown kind
    let wrong_shape = text_envelope(MessageKind::MakeReservation, "alice,building-1")
        .unwrap()
        .with_metadata(REPLY_TO, client_key("alice"));
    bus.publish(&agent, &wrong_shape).await.unwrap();
    bus.publish(&agent, &Envelope::empty("MakeReservation")).await.unwrap();
    bus.publish(&agent, &Envelope::empty("Teleport")).await.unwrap();

    reserve(&mut client, "building-1", "room-1", "confirmed").await;
    assert_eq!(app.agent().state(|s| s.reservations.len()).await, 1);
    app.shutdown().await.unwrap();
}

#[tokio::test]
async fn duplicate_outcome_is_forwarded_without_changing_records() {
    let (mut app, bus) = start_with_buildings(&[1]).await;
    let mut client = app.connect_client("alice").await.unwrap();
    let (number, _) = reserve(&mut client, "building-1", "room-1", "confirmed").await;

    let duplicate = BuildingReply::Confirmed("The reservation is confirmed for Building-1 Room-1".to_string())
        .to_envelope()
        .unwrap()
        .with_metadata(RESERVATION, number.clone())
        .with_metadata(REPLY_TO, client_key("alice"));
    bus.publish(&Route::direct(RENTAL_AGENT_KEY), &duplicate).await.unwrap();

    notice_containing(&mut client, "confirmed").await;
    assert_eq!(local_status(&client, &number).await, Some(LocalStatus::Confirmed));
    assert_eq!(app.agent().state(|s| s.reservations.len()).await, 1);
    assert_eq!(app.agent().state(|s| s.in_flight()).await, 0);
    app.shutdown().await.unwrap();
}

#[tokio::test]
async fn invalid_console_input_sends_nothing() {
    let (mut app, _bus) = start_with_buildings(&[1]).await;
    let client = app.connect_client("alice").await.unwrap();

    assert!(client.reserve("tower-1", "room-1").await.is_err());
    assert!(client.reserve("building-1", "suite").await.is_err());
    assert!(client.cancel("   ").await.is_err());

    assert!(app.agent().state(|s| s.reservations.is_empty()).await);
    assert!(app.connect_client("alice").await.is_err());
    assert!(app.connect_client("has space").await.is_err());
    app.shutdown().await.unwrap();
}

#[tokio::test]
async fn lost_broker_stops_consumers_and_shutdown_completes() {
    let (app, bus) = start_with_buildings(&[1]).await;

    bus.disconnect();
    assert!(!bus.is_connected());

    app.shutdown().await.unwrap();
}
