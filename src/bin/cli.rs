// Live Relay CLI Validation Tool
// Drives the relay server as a teacher or a student and runs automated checks

use clap::{Parser, Subcommand};
use colored::*;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use relay_server::relay::ServerMessage;
use relay_server::session::{SessionWatcher, DEFAULT_GRACE_WINDOW};
use relay_server::storage::HttpStorageClient;

type WsWrite = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsRead = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

#[derive(Parser)]
#[command(name = "relay-cli")]
#[command(about = "Live Relay CLI Validation Tool", long_about = None)]
struct Cli {
    /// Server address (default: 127.0.0.1:8080)
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server health endpoint
    Health,

    /// Get server configuration
    Config,

    /// Show the current live session status
    Status,

    /// Test WebSocket connection
    Connect,

    /// Go live as a teacher
    StartLive {
        /// Teacher id
        #[arg(short, long)]
        teacher_id: String,

        /// Enable the audio flag after going live
        #[arg(short, long)]
        audio: bool,

        /// Number of scripted whiteboard updates to send
        #[arg(short, long, default_value_t = 0)]
        draw: u32,

        /// Keep the session live (press Ctrl+C to exit)
        #[arg(short, long)]
        keep_alive: bool,
    },

    /// Stop a live session
    StopLive {
        /// Teacher id
        #[arg(short, long)]
        teacher_id: String,
    },

    /// Observe a teacher as a student and persist the session when it ends
    Watch {
        /// Teacher id to observe
        #[arg(short, long)]
        teacher_id: String,

        /// Student id recorded in the persisted session
        #[arg(long, default_value = "cli-student")]
        student_id: String,

        /// Grace window in milliseconds before an offline signal is trusted
        #[arg(short, long, default_value_t = DEFAULT_GRACE_WINDOW.as_millis() as u64)]
        grace_ms: u64,
    },

    /// Run automated validation scenarios
    Validate {
        /// Run all validation tests
        #[arg(short, long)]
        all: bool,

        /// Test specific scenario
        #[arg(long)]
        scenario: Option<String>,
    },

    /// Interactive mode - send raw messages
    Interactive,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Health => check_health(&cli.server).await,
        Commands::Config => check_config(&cli.server).await,
        Commands::Status => check_status(&cli.server).await,
        Commands::Connect => test_connection(&cli.server).await,
        Commands::StartLive {
            teacher_id,
            audio,
            draw,
            keep_alive,
        } => start_live(&cli.server, teacher_id, *audio, *draw, *keep_alive).await,
        Commands::StopLive { teacher_id } => stop_live(&cli.server, teacher_id).await,
        Commands::Watch {
            teacher_id,
            student_id,
            grace_ms,
        } => watch(&cli.server, teacher_id, student_id, *grace_ms).await,
        Commands::Validate { all, scenario } => {
            if *all {
                run_all_validations(&cli.server).await;
            } else if let Some(s) = scenario {
                run_scenario(&cli.server, s).await;
            } else {
                println!("{}", "Use --all or --scenario <name>".yellow());
                list_scenarios();
            }
        }
        Commands::Interactive => interactive_mode(&cli.server).await,
    }
}

fn ws_url(server: &str) -> String {
    format!("ws://{}/live", server)
}

async fn check_health(server: &str) {
    println!("{}", "Checking server health...".cyan());

    let url = format!("http://{}/live/health", server);
    let client = reqwest::Client::new();

    match client.get(&url).send().await {
        Ok(resp) => {
            let status = resp.status();
            if status.is_success() {
                println!("{} Health check passed", "✓".green());

                if let Ok(body) = resp.json::<serde_json::Value>().await {
                    println!("  Status: {}", body["status"].as_str().unwrap_or("unknown"));
                    println!("  Service: {}", body["service"].as_str().unwrap_or("unknown"));
                    println!("  Version: {}", body["version"].as_str().unwrap_or("unknown"));
                }
            } else {
                println!("{} Health check failed: {}", "✗".red(), status);
            }
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            println!("  Make sure the server is running on {}", server);
        }
    }
}

async fn check_config(server: &str) {
    println!("{}", "Fetching server configuration...".cyan());

    let url = format!("http://{}/live/config", server);
    let client = reqwest::Client::new();

    match client.get(&url).send().await {
        Ok(resp) => {
            if resp.status().is_success() {
                println!("{} Config endpoint accessible", "✓".green());

                if let Ok(body) = resp.json::<serde_json::Value>().await {
                    println!("\nConfiguration:");
                    println!("{}", serde_json::to_string_pretty(&body).unwrap());
                }
            } else {
                println!("{} Config fetch failed: {}", "✗".red(), resp.status());
            }
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
        }
    }
}

async fn check_status(server: &str) {
    println!("{}", "Fetching live session status...".cyan());

    let url = format!("http://{}/live/status", server);
    let client = reqwest::Client::new();

    match client.get(&url).send().await {
        Ok(resp) => {
            if resp.status().is_success() {
                if let Ok(body) = resp.json::<serde_json::Value>().await {
                    if body["live"].as_bool().unwrap_or(false) {
                        println!(
                            "{} Live: {} ({} observers, audio: {})",
                            "✓".green(),
                            body["teacherId"].as_str().unwrap_or("unknown").bold(),
                            body["observers"],
                            body["audioEnabled"]
                        );
                    } else {
                        println!("{} No teacher is live", "·".yellow());
                    }
                    println!("  Connections: {}", body["connections"]);
                }
            } else {
                println!("{} Status fetch failed: {}", "✗".red(), resp.status());
            }
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
        }
    }
}

async fn test_connection(server: &str) {
    println!("{}", "Testing WebSocket connection...".cyan());

    let url = ws_url(server);

    match connect_async(&url).await {
        Ok((ws_stream, _)) => {
            println!("{} WebSocket connection established", "✓".green());
            println!("  URL: {}", url);
            drop(ws_stream);
            println!("{} Connection closed cleanly", "✓".green());
        }
        Err(e) => {
            println!("{} WebSocket connection failed: {}", "✗".red(), e);
        }
    }
}

/// Waits for the next text frame and parses it as a server message.
async fn next_server_message(read: &mut WsRead, wait: Duration) -> Option<ServerMessage> {
    loop {
        match timeout(wait, read.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                if let Ok(message) = serde_json::from_str::<ServerMessage>(&text) {
                    return Some(message);
                }
            }
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => return None,
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(_))) => return None,
            Err(_) => return None,
        }
    }
}

async fn send_json(write: &mut WsWrite, value: serde_json::Value) -> bool {
    write.send(Message::Text(value.to_string())).await.is_ok()
}

async fn start_live(server: &str, teacher_id: &str, audio: bool, draw: u32, keep_alive: bool) {
    println!("{}", "Going live...".cyan());
    println!("  Teacher ID: {}", teacher_id);

    let (ws_stream, _) = match connect_async(&ws_url(server)).await {
        Ok(ok) => ok,
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            return;
        }
    };
    let (mut write, mut read) = ws_stream.split();

    if !send_json(&mut write, json!({"type": "startLive", "teacherId": teacher_id})).await {
        println!("{} Failed to send startLive message", "✗".red());
        return;
    }

    match next_server_message(&mut read, Duration::from_secs(5)).await {
        Some(ServerMessage::TeacherOnline { teacher_id, .. }) => {
            println!("{} Live session started!", "✓".green());
            println!("\n{}", "═".repeat(50).green());
            println!("{} {}", "Live teacher:".bold(), teacher_id.green().bold());
            println!("{}", "═".repeat(50).green());
        }
        Some(ServerMessage::LiveError { message }) => {
            println!("{} {}", "✗".red(), message);
            return;
        }
        Some(other) => {
            println!("{} Unexpected response: {:?}", "✗".yellow(), other);
            return;
        }
        None => {
            println!("{} Timeout waiting for response", "✗".red());
            return;
        }
    }

    if audio {
        send_json(
            &mut write,
            json!({"type": "audioToggle", "teacherId": teacher_id, "enabled": true}),
        )
        .await;
        println!("{} Audio flag enabled", "✓".green());
    }

    for i in 0..draw {
        let stroke = json!([{ "stroke": i, "points": [[i, 0], [i, i]] }]);
        send_json(
            &mut write,
            json!({
                "type": "whiteboardUpdate",
                "teacherId": teacher_id,
                "whiteboardData": stroke.to_string()
            }),
        )
        .await;
        println!("{} whiteboardUpdate {}/{}", "▶".cyan(), i + 1, draw);
        sleep(Duration::from_millis(300)).await;
    }

    if keep_alive {
        println!("\n{}", "Session is live...".yellow());
        println!("Students can watch with: relay-cli watch -t {}", teacher_id.green().bold());
        println!("Press {} to stop the session.", "Ctrl+C".bold());

        loop {
            match timeout(Duration::from_secs(30), read.next()).await {
                Ok(Some(Ok(Message::Text(text)))) => {
                    println!("{} {}", "◀".green(), text.bright_white());
                }
                Ok(Some(Ok(Message::Close(_)))) => {
                    println!("{} Server closed the connection", "✗".yellow());
                    break;
                }
                Ok(Some(Ok(_))) => continue,
                Ok(Some(Err(e))) => {
                    println!("{} Connection error: {}", "✗".red(), e);
                    break;
                }
                Ok(None) => {
                    println!("{} Connection closed", "✗".yellow());
                    break;
                }
                Err(_) => continue,
            }
        }
    } else {
        send_json(
            &mut write,
            json!({"type": "sessionEnded", "teacherId": teacher_id, "hasAudio": audio}),
        )
        .await;
        send_json(&mut write, json!({"type": "stopLive", "teacherId": teacher_id})).await;
        println!("{} Session ended and stopped", "✓".green());
    }
}

async fn stop_live(server: &str, teacher_id: &str) {
    println!("{}", "Stopping live session...".cyan());

    let (ws_stream, _) = match connect_async(&ws_url(server)).await {
        Ok(ok) => ok,
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            return;
        }
    };
    let (mut write, mut read) = ws_stream.split();

    if !send_json(&mut write, json!({"type": "stopLive", "teacherId": teacher_id})).await {
        println!("{} Failed to send stopLive message", "✗".red());
        return;
    }

    match next_server_message(&mut read, Duration::from_secs(2)).await {
        Some(ServerMessage::TeacherOffline { teacher_id, .. }) => {
            println!("{} Session for {} stopped", "✓".green(), teacher_id.bold());
        }
        _ => {
            println!(
                "{} No offline broadcast received (teacher may not have been live)",
                "·".yellow()
            );
        }
    }
}

async fn watch(server: &str, teacher_id: &str, student_id: &str, grace_ms: u64) {
    println!("{}", "Watching live session...".cyan());
    println!("  Teacher ID: {}", teacher_id);
    println!("  Student ID: {}", student_id);

    let storage = match HttpStorageClient::from_env() {
        Ok(client) => client,
        Err(e) => {
            println!("{} Cannot build storage client: {}", "✗".red(), e);
            return;
        }
    };
    let watcher = SessionWatcher::new(
        student_id,
        Duration::from_millis(grace_ms),
        storage.clone(),
        storage,
    );

    let (ws_stream, _) = match connect_async(&ws_url(server)).await {
        Ok(ok) => ok,
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            return;
        }
    };
    let (mut write, mut read) = ws_stream.split();

    send_json(&mut write, json!({"type": "checkTeacherStatus"})).await;
    if !send_json(&mut write, json!({"type": "joinTeacherRoom", "teacherId": teacher_id})).await {
        println!("{} Failed to send joinTeacherRoom message", "✗".red());
        return;
    }
    println!("{} Joined, waiting for events...", "✓".green());

    let mut saw_offline = false;
    loop {
        match timeout(Duration::from_millis(500), read.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(message) => {
                        println!("{} {}", "◀".green(), text.bright_white());
                        if matches!(message, ServerMessage::TeacherOffline { .. }) {
                            saw_offline = true;
                        }
                        watcher.apply(message).await;
                    }
                    Err(_) => println!("{} {}", "?".yellow(), text),
                }
            }
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                println!("{} Connection closed", "✗".yellow());
                break;
            }
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(e))) => {
                println!("{} Connection error: {}", "✗".red(), e);
                break;
            }
            Err(_) => {
                if saw_offline && watcher.is_idle().await {
                    println!("{} Session ended, persistence settled", "✓".green());
                    break;
                }
            }
        }
    }
}

fn list_scenarios() {
    println!("\n{}", "Available Validation Scenarios:".bold());
    println!("  {} - Basic WebSocket connection test", "connection".cyan());
    println!("  {} - Teacher start/stop round trip", "start-live".cyan());
    println!("  {} - Student join and whiteboard relay", "join-room".cyan());
    println!(
        "  {} - Second teacher is rejected while one is live",
        "second-teacher".cyan()
    );
    println!("\nExample: relay-cli validate --scenario connection");
}

async fn run_scenario(server: &str, scenario: &str) -> bool {
    println!("\n{} {}", "Running scenario:".bold(), scenario.cyan());

    let passed = match scenario {
        "connection" => scenario_connection(server).await,
        "start-live" => scenario_start_live(server).await,
        "join-room" => scenario_join_room(server).await,
        "second-teacher" => scenario_second_teacher(server).await,
        _ => {
            println!("{} Unknown scenario: {}", "✗".red(), scenario);
            list_scenarios();
            return false;
        }
    };

    if passed {
        println!("{} Scenario {} passed", "✓".green().bold(), scenario);
    } else {
        println!("{} Scenario {} failed", "✗".red().bold(), scenario);
    }
    passed
}

async fn run_all_validations(server: &str) {
    let scenarios = ["connection", "start-live", "join-room", "second-teacher"];
    let mut failures = 0;

    for scenario in scenarios {
        if !run_scenario(server, scenario).await {
            failures += 1;
        }
        // Let the previous session's teardown broadcast settle
        sleep(Duration::from_millis(200)).await;
    }

    println!("\n{}", "═".repeat(50));
    if failures == 0 {
        println!("{}", "All scenarios passed".green().bold());
    } else {
        println!("{} {} scenario(s) failed", "✗".red(), failures);
    }
}

async fn scenario_connection(server: &str) -> bool {
    match connect_async(&ws_url(server)).await {
        Ok((ws_stream, _)) => {
            drop(ws_stream);
            true
        }
        Err(e) => {
            println!("{} Cannot connect: {}", "✗".red(), e);
            false
        }
    }
}

async fn scenario_start_live(server: &str) -> bool {
    let Ok((ws_stream, _)) = connect_async(&ws_url(server)).await else {
        println!("{} Cannot connect", "✗".red());
        return false;
    };
    let (mut write, mut read) = ws_stream.split();

    send_json(&mut write, json!({"type": "startLive", "teacherId": "validate-t1"})).await;
    let online = matches!(
        next_server_message(&mut read, Duration::from_secs(2)).await,
        Some(ServerMessage::TeacherOnline { .. })
    );
    if !online {
        println!("{} Did not receive teacherOnline", "✗".red());
        return false;
    }

    send_json(&mut write, json!({"type": "stopLive", "teacherId": "validate-t1"})).await;
    let offline = matches!(
        next_server_message(&mut read, Duration::from_secs(2)).await,
        Some(ServerMessage::TeacherOffline { .. })
    );
    if !offline {
        println!("{} Did not receive teacherOffline", "✗".red());
    }
    offline
}

async fn scenario_join_room(server: &str) -> bool {
    let Ok((teacher_stream, _)) = connect_async(&ws_url(server)).await else {
        println!("{} Cannot connect teacher", "✗".red());
        return false;
    };
    let (mut t_write, mut t_read) = teacher_stream.split();

    send_json(&mut t_write, json!({"type": "startLive", "teacherId": "validate-t2"})).await;
    if !matches!(
        next_server_message(&mut t_read, Duration::from_secs(2)).await,
        Some(ServerMessage::TeacherOnline { .. })
    ) {
        println!("{} Teacher could not go live", "✗".red());
        return false;
    }

    let Ok((student_stream, _)) = connect_async(&ws_url(server)).await else {
        println!("{} Cannot connect student", "✗".red());
        return false;
    };
    let (mut s_write, mut s_read) = student_stream.split();

    send_json(&mut s_write, json!({"type": "joinTeacherRoom", "teacherId": "validate-t2"})).await;
    if !matches!(
        next_server_message(&mut s_read, Duration::from_secs(2)).await,
        Some(ServerMessage::TeacherOnline { .. })
    ) {
        println!("{} Student did not receive catch-up online", "✗".red());
        return false;
    }

    send_json(
        &mut t_write,
        json!({"type": "whiteboardUpdate", "teacherId": "validate-t2", "whiteboardData": "[]"}),
    )
    .await;

    let relayed = matches!(
        next_server_message(&mut s_read, Duration::from_secs(2)).await,
        Some(ServerMessage::WhiteboardUpdate { .. })
    );
    if !relayed {
        println!("{} Student did not receive whiteboard update", "✗".red());
    }

    // The sender must not receive its own stroke back
    let echoed = matches!(
        next_server_message(&mut t_read, Duration::from_millis(500)).await,
        Some(ServerMessage::WhiteboardUpdate { .. })
    );
    if echoed {
        println!("{} Teacher received its own whiteboard echo", "✗".red());
    }

    send_json(&mut t_write, json!({"type": "stopLive", "teacherId": "validate-t2"})).await;
    relayed && !echoed
}

async fn scenario_second_teacher(server: &str) -> bool {
    let Ok((t1_stream, _)) = connect_async(&ws_url(server)).await else {
        println!("{} Cannot connect first teacher", "✗".red());
        return false;
    };
    let (mut t1_write, mut t1_read) = t1_stream.split();

    send_json(&mut t1_write, json!({"type": "startLive", "teacherId": "validate-t3"})).await;
    if !matches!(
        next_server_message(&mut t1_read, Duration::from_secs(2)).await,
        Some(ServerMessage::TeacherOnline { .. })
    ) {
        println!("{} First teacher could not go live", "✗".red());
        return false;
    }

    let Ok((t2_stream, _)) = connect_async(&ws_url(server)).await else {
        println!("{} Cannot connect second teacher", "✗".red());
        return false;
    };
    let (mut t2_write, mut t2_read) = t2_stream.split();

    send_json(&mut t2_write, json!({"type": "startLive", "teacherId": "validate-t4"})).await;
    let rejected = matches!(
        next_server_message(&mut t2_read, Duration::from_secs(2)).await,
        Some(ServerMessage::LiveError { .. })
    );
    if !rejected {
        println!("{} Second teacher was not rejected", "✗".red());
    }

    send_json(&mut t1_write, json!({"type": "stopLive", "teacherId": "validate-t3"})).await;
    rejected
}

async fn interactive_mode(server: &str) {
    println!("{}", "Interactive mode".bold());
    println!("Type a JSON message per line, e.g.:");
    println!("  {}", r#"{"type":"checkTeacherStatus"}"#.cyan());
    println!("  {}", r#"{"type":"startLive","teacherId":"T1"}"#.cyan());
    println!("Press Ctrl+D to exit.\n");

    let (ws_stream, _) = match connect_async(&ws_url(server)).await {
        Ok(ok) => ok,
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            return;
        }
    };
    let (mut write, mut read) = ws_stream.split();

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        let line = line.trim().to_string();
                        if line.is_empty() {
                            continue;
                        }
                        if write.send(Message::Text(line)).await.is_err() {
                            println!("{} Failed to send", "✗".red());
                            break;
                        }
                    }
                    _ => break,
                }
            }
            message = read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        println!("{} {}", "◀".green(), text.bright_white());
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        println!("{} Connection closed", "✗".yellow());
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        println!("{} Connection error: {}", "✗".red(), e);
                        break;
                    }
                }
            }
        }
    }
}
