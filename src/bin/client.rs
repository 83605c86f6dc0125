//! Interactive demo client: joins a project room, prints everything the
//! room broadcasts, and turns stdin lines into events. A line of the form
//! `x y` moves your cursor; anything else is sent as an activity ping.

use storyboard_collab::{CollabSession, Cursor, Identity};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal::ctrl_c;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let server = args.next().unwrap_or_else(|| "ws://127.0.0.1:8080".to_string());
    let project = args.next().unwrap_or_else(|| "demo-project".to_string());
    let user_id = args.next().unwrap_or_else(|| "demo-user".to_string());
    let name = args.next().unwrap_or_else(|| user_id.clone());

    let identity = Identity {
        id: user_id.clone(),
        name,
        email: format!("{user_id}@example.com"),
    };

    let mut session = CollabSession::connect(&server, project.clone(), identity).await?;
    println!(
        "joined '{project}', online: {:?}",
        session
            .online_users()
            .iter()
            .map(|u| u.name.clone())
            .collect::<Vec<_>>()
    );

    let mut events = session.events().ok_or("event stream already taken")?;
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            println!("<< {event:?}");
        }
    });

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = stdin.next_line() => {
                match line? {
                    Some(line) if line.is_empty() => continue,
                    Some(line) => {
                        if let Some(cursor) = parse_cursor(&line) {
                            session.send_cursor_move(cursor).await?;
                        } else {
                            session.send_user_activity(line).await?;
                        }
                        if !session.is_connected() {
                            eprintln!("connection lost");
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = ctrl_c() => {
                println!("shutting down");
                break;
            }
        }
    }

    session.close().await;
    printer.abort();
    Ok(())
}

fn parse_cursor(line: &str) -> Option<Cursor> {
    let mut parts = line.split_whitespace();
    let x = parts.next()?.parse().ok()?;
    let y = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(Cursor {
        x,
        y,
        scene_id: None,
    })
}
