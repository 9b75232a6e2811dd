//! Adventure - play the text adventure against an in-process cluster.
//!
//! Starts `--nodes` nodes sharing one in-memory state store, membership
//! table and actor directory, seeds the world, then reads commands from
//! stdin.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin adventure -- --cluster-id dev --service-id adventure
//! ```
//!
//! Then type your name, followed by commands such as `look`, `north`,
//! `take lamp` or `kill goblin`. `end` leaves the game.

use std::io::Write;
use std::process::ExitCode;

use adventure::actors::{ActorError, AdventureNode, ClusterConfig};
use adventure::config::{AdventureArgs, Settings};
use adventure::front_door::{FrontDoorError, PlayerService};
use adventure::game::{
    Command, CommandPolicy, MonsterActor, PlayerActor, RoomActor, SimpleCommands, seed_world,
};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let settings = match AdventureArgs::parse().into_settings() {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration, refusing to start");
            return ExitCode::FAILURE;
        }
    };

    let local = tokio::task::LocalSet::new();
    match local.run_until(run(settings)).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "adventure failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(
        cluster = %settings.cluster_id,
        service = %settings.service_id,
        nodes = settings.nodes,
        region = %settings.store.region,
        "starting cluster"
    );

    let cluster = ClusterConfig::builder()
        .cluster_id(settings.cluster_id.clone())
        .service_id(settings.service_id.clone())
        .build()?;

    let mut nodes = Vec::with_capacity(settings.nodes);
    for index in 0..settings.nodes {
        let node = AdventureNode::builder(cluster.clone(), settings.node_config(index))
            .register::<PlayerActor>()
            .register::<RoomActor>()
            .register::<MonsterActor>()
            .start()
            .await?;
        nodes.push(node);
    }
    let Some(front) = nodes.first() else {
        return Err("no nodes started".into());
    };

    seed_world(front.router()).await?;
    let service = PlayerService::new(front.router().clone());
    let result = play(&service).await;

    for node in &nodes {
        if let Err(e) = node.shutdown().await {
            tracing::warn!(node = %node.address(), error = %e, "shutdown failed");
        }
    }
    result
}

fn prompt(text: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    write!(stdout, "{text}")?;
    stdout.flush()
}

async fn play(service: &PlayerService) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    prompt("What is your name? ")?;
    let Some(name) = lines.next_line().await? else {
        return Ok(());
    };
    let player = service.create_player(&name).await?;
    println!("Welcome, {}.\n", player.name);
    println!("{}", service.play(player.id, "look").await?);

    loop {
        prompt("\n> ")?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        match service.play(player.id, &line).await {
            Ok(text) => println!("{text}"),
            Err(FrontDoorError::Actor(ActorError::Gone(_))) => {
                println!("You are dead.");
                break;
            }
            Err(e) => println!("Something went wrong: {e}"),
        }
        if SimpleCommands.parse(&line) == Command::End {
            break;
        }
    }
    Ok(())
}
