//! Interactive booking console.
//!
//! Runs the whole system in one process over the in-memory broker and drives
//! one client from stdin.

use anyhow::Context;
use booking_broker::InMemoryBus;
use booking_core::bus::MessageBus;
use booking_rental::error::ServiceError;
use booking_rental::input::MenuChoice;
use booking_rental::protocol::{DIRECT_EXCHANGE, FANOUT_EXCHANGE};
use booking_rental::requester::{Notice, Tone};
use booking_rental::{Application, ClientHandle, Config};
use booking_runtime::metrics::MetricsServer;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const GREEN: &str = "\u{1b}[32m";
const RED: &str = "\u{1b}[31m";
const RESET: &str = "\u{1b}[0m";

type Input = Lines<BufReader<Stdin>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "booking_rental=info,booking_runtime=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::from_env();
    info!(?config, "Configuration loaded");

    let _metrics = match config.metrics_addr {
        Some(addr) => {
            let mut server = MetricsServer::new(addr);
            server.start().context("starting metrics exporter")?;
            Some(server)
        },
        None => None,
    };

    let bus: Arc<dyn MessageBus> = Arc::new(InMemoryBus::new(DIRECT_EXCHANGE, FANOUT_EXCHANGE));
    let mut app = Application::start(config.clone(), bus)
        .await
        .context("starting services")?;

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    println!("Hello! Welcome to booking.nl!");

    let Some(mut client) = connect(&mut app, &mut input, config.username.clone()).await? else {
        println!("Exiting...");
        return app.shutdown().await.context("shutting down");
    };

    for rooms in &config.seed_buildings {
        app.register_building(*rooms).await?;
    }

    if let Some(mut notices) = client.take_notices() {
        tokio::spawn(async move {
            while let Some(notice) = notices.recv().await {
                print_notice(&notice);
            }
        });
    }

    run_menu(&client, &mut input).await?;

    println!("Exiting...");
    app.shutdown().await.context("shutting down")
}

/// Print `prompt` and read one line; `None` on end of input or Ctrl+C.
async fn read_line(input: &mut Input, prompt: &str) -> anyhow::Result<Option<String>> {
    print!("{prompt}");
    std::io::stdout().flush()?;

    tokio::select! {
        line = input.next_line() => Ok(line?),
        _ = tokio::signal::ctrl_c() => {
            println!();
            Ok(None)
        },
    }
}

async fn connect(
    app: &mut Application,
    input: &mut Input,
    configured: Option<String>,
) -> anyhow::Result<Option<ClientHandle>> {
    let mut candidate = configured;
    loop {
        let name = match candidate.take() {
            Some(name) => name,
            None => match read_line(input, "Please create a username: ").await? {
                Some(name) => name,
                None => return Ok(None),
            },
        };

        match app.connect_client(&name).await {
            Ok(client) => return Ok(Some(client)),
            Err(e @ (ServiceError::Input(_) | ServiceError::ClientExists(_))) => print_red(&e.to_string()),
            Err(e) => return Err(e.into()),
        }
    }
}

async fn run_menu(client: &ClientHandle, input: &mut Input) -> anyhow::Result<()> {
    loop {
        println!("----------------------- &&&&& -----------------------");
        println!("1. List Buildings");
        println!("2. Make a Reservation");
        println!("3. Cancel the Reservation");
        println!("4. View My Reservations");
        println!("5. Quit");

        let Some(line) = read_line(input, "Choose an option: ").await? else {
            return Ok(());
        };
        let choice = match line.parse::<MenuChoice>() {
            Ok(choice) => choice,
            Err(e) => {
                print_red(&e.to_string());
                continue;
            },
        };

        let result = match choice {
            MenuChoice::ListBuildings => client.list_buildings().await,
            MenuChoice::MakeReservation => {
                client.list_buildings().await?;
                let Some(building) = read_line(input, "Enter Building Name (e.g., building-1): ").await? else {
                    return Ok(());
                };
                let Some(room) = read_line(input, "Enter Room Name (e.g., room-1): ").await? else {
                    return Ok(());
                };
                client.reserve(&building, &room).await
            },
            MenuChoice::CancelReservation => {
                if !show_reservations(client).await {
                    continue;
                }
                let Some(number) =
                    read_line(input, "Enter the reservation number that you want to cancel: ").await?
                else {
                    return Ok(());
                };
                client.cancel(&number).await
            },
            MenuChoice::ViewReservations => {
                show_reservations(client).await;
                Ok(())
            },
            MenuChoice::Quit => return Ok(()),
        };

        match result {
            Ok(()) => {},
            Err(ServiceError::Input(e)) => print_red(&e.to_string()),
            Err(e) => return Err(e.into()),
        }
    }
}

/// Print own reservations; `false` when there are none.
async fn show_reservations(client: &ClientHandle) -> bool {
    let reservations = client.reservations().await;
    if reservations.is_empty() {
        print_red("There is no reservation that is issued with your username.");
        return false;
    }
    for reservation in reservations {
        println!("{reservation}");
    }
    true
}

fn print_notice(notice: &Notice) {
    match notice.tone {
        Tone::Success => println!("{GREEN}{notice}{RESET}"),
        Tone::Failure => print_red(&notice.text),
        Tone::Info => println!("{notice}"),
    }
}

fn print_red(text: &str) {
    println!("{RED}{text}{RESET}");
}
