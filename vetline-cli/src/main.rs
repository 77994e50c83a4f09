//! vetline-cli - terminal client for the Vetline emergency triage gateway
//!
//! Talks to the HTTP API of `vetline-server`.
//!
//! # Subcommands
//! - `submit <description> --pet-name --species --age --lat --lng [--radius]`
//! - `candidates <request-id> [--radius]`
//! - `select <request-id> <responder-id>`
//! - `say <request-id> <content> [--responder <id>]`
//! - `messages <request-id> [--after <seq>]`
//! - `close <request-id> [--responder <id>]`
//! - `availability <responder-id> <available|busy|offline>`
//! - `status`

use clap::{Parser, Subcommand};
use serde::Deserialize;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8780";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "vetline-cli",
    version,
    about = "Vetline emergency triage - terminal client"
)]
struct Cli {
    /// Vetline HTTP server URL (overrides VETLINE_HTTP_URL env var)
    #[arg(long, env = "VETLINE_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    /// Print raw JSON responses
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Submit an emergency request
    Submit {
        /// What is happening to the pet
        description: String,

        #[arg(long)]
        pet_name: String,

        /// dog, cat, bird, rabbit or other
        #[arg(long)]
        species: String,

        #[arg(long)]
        age: String,

        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        #[arg(long, allow_hyphen_values = true)]
        lng: f64,

        /// Initial search radius in km
        #[arg(long)]
        radius: Option<f64>,
    },

    /// List ranked veterinarians for a request
    Candidates {
        request_id: String,

        #[arg(long)]
        radius: Option<f64>,
    },

    /// Accept a request as a veterinarian
    Select {
        request_id: String,
        responder_id: String,
    },

    /// Send a chat message (as the requester unless --responder is given)
    Say {
        request_id: String,
        content: String,

        #[arg(long)]
        responder: Option<String>,
    },

    /// Show the chat log
    Messages {
        request_id: String,

        /// Only messages after this sequence number
        #[arg(long)]
        after: Option<u64>,
    },

    /// Close a session (as the requester unless --responder is given)
    Close {
        request_id: String,

        #[arg(long)]
        responder: Option<String>,
    },

    /// Set a veterinarian's availability
    Availability {
        responder_id: String,
        availability: String,
    },

    /// Show Vetline server status
    Status,
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ResponderView {
    pub id: String,
    pub name: String,
    pub rating_average: f64,
}

#[derive(Debug, Deserialize)]
pub struct CandidateView {
    pub responder: ResponderView,
    pub distance_km: f64,
    pub estimated_response_minutes: u32,
    pub score: f64,
}

#[derive(Debug, Deserialize)]
pub struct MessageView {
    pub seq: u64,
    pub sender: String,
    pub content: String,
    pub sent_at: String,
}

// ============================================================================
// Formatting
// ============================================================================

/// One line per ranked candidate: rank, name, distance, rating, ETA, score.
pub fn format_candidate(rank: usize, c: &CandidateView) -> String {
    format!(
        "{:>2}. {:<28} {:>5.1} km  ★ {:.1}  ~{} min  (score {:.3}) [{}]",
        rank,
        c.responder.name,
        c.distance_km,
        c.responder.rating_average,
        c.estimated_response_minutes,
        c.score,
        c.responder.id
    )
}

/// `[seq] HH:MM sender: content`
pub fn format_message(m: &MessageView) -> String {
    let time = m
        .sent_at
        .split('T')
        .nth(1)
        .map(|t| t.chars().take(5).collect::<String>())
        .unwrap_or_default();
    format!("[{}] {} {}: {}", m.seq, time, m.sender, m.content)
}

/// Human-readable error from a gateway error body.
pub fn format_error(status: u16, body: &serde_json::Value) -> String {
    match (body["code"].as_str(), body["error"].as_str()) {
        (Some(code), Some(error)) => format!("{} ({}, HTTP {})", error, code, status),
        _ => format!("server returned HTTP {}", status),
    }
}

fn parse_list<T: for<'de> Deserialize<'de>>(body: &serde_json::Value, key: &str) -> anyhow::Result<Vec<T>> {
    Ok(serde_json::from_value(body[key].clone())?)
}

// ============================================================================
// HTTP Client
// ============================================================================

struct Client {
    http: reqwest::blocking::Client,
    server: String,
}

impl Client {
    fn new(server: &str) -> anyhow::Result<Self> {
        let http = reqwest::blocking::Client::builder()
            // Requester messages wait for the assistant's reply
            .timeout(std::time::Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            server: server.trim_end_matches('/').to_string(),
        })
    }

    fn send(&self, req: reqwest::blocking::RequestBuilder) -> anyhow::Result<serde_json::Value> {
        let resp = req
            .send()
            .map_err(|e| anyhow::anyhow!("cannot reach {}: {}", self.server, e))?;
        let status = resp.status();
        let body: serde_json::Value = resp.json().unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!(format_error(status.as_u16(), &body));
        }
        Ok(body)
    }

    fn get(&self, path: &str) -> anyhow::Result<serde_json::Value> {
        self.send(self.http.get(format!("{}{}", self.server, path)))
    }

    fn post(&self, path: &str, body: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        self.send(self.http.post(format!("{}{}", self.server, path)).json(&body))
    }

    fn put(&self, path: &str, body: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        self.send(self.http.put(format!("{}{}", self.server, path)).json(&body))
    }
}

// ============================================================================
// Commands
// ============================================================================

fn run(cli: Cli) -> anyhow::Result<()> {
    let client = Client::new(&cli.server)?;
    let json = cli.json;

    let print_json = |body: &serde_json::Value| -> anyhow::Result<()> {
        println!("{}", serde_json::to_string_pretty(body)?);
        Ok(())
    };

    match cli.command {
        Commands::Submit {
            description,
            pet_name,
            species,
            age,
            lat,
            lng,
            radius,
        } => {
            let body = client.post(
                "/requests",
                serde_json::json!({
                    "description": description,
                    "pet": { "name": pet_name, "species": species, "age": age },
                    "location": { "lat": lat, "lng": lng },
                    "radius_km": radius,
                }),
            )?;
            if json {
                return print_json(&body);
            }
            println!("Request:  {}", body["request_id"].as_str().unwrap_or("?"));
            println!("Status:   {}", body["status"].as_str().unwrap_or("?"));
            println!("Radius:   {} km", body["search_radius_km"]);
            if let Some(hint) = body["hint"].as_str() {
                println!("{}", hint);
            }
            let notified: Vec<CandidateView> = parse_list(&body, "notified")?;
            for (i, c) in notified.iter().enumerate() {
                println!("{}", format_candidate(i + 1, c));
            }
        }
        Commands::Candidates { request_id, radius } => {
            let path = match radius {
                Some(r) => format!("/requests/{}/candidates?radius_km={}", request_id, r),
                None => format!("/requests/{}/candidates", request_id),
            };
            let body = client.get(&path)?;
            if json {
                return print_json(&body);
            }
            let candidates: Vec<CandidateView> = parse_list(&body, "candidates")?;
            if candidates.is_empty() {
                eprintln!("No veterinarians available in range.");
            }
            for (i, c) in candidates.iter().enumerate() {
                println!("{}", format_candidate(i + 1, c));
            }
        }
        Commands::Select {
            request_id,
            responder_id,
        } => {
            let body = client.post(
                &format!("/requests/{}/select", request_id),
                serde_json::json!({ "responder_id": responder_id }),
            )?;
            if json {
                return print_json(&body);
            }
            println!("Matched: {}", body["selected_responder_id"].as_str().unwrap_or("?"));
        }
        Commands::Say {
            request_id,
            content,
            responder,
        } => {
            let sender = if responder.is_some() { "responder" } else { "requester" };
            let body = client.post(
                &format!("/requests/{}/messages", request_id),
                serde_json::json!({
                    "sender": sender,
                    "content": content,
                    "responder_id": responder,
                }),
            )?;
            if json {
                return print_json(&body);
            }
            for key in ["message", "assistant_reply"] {
                if body[key].is_object() {
                    let m: MessageView = serde_json::from_value(body[key].clone())?;
                    println!("{}", format_message(&m));
                }
            }
        }
        Commands::Messages { request_id, after } => {
            let path = match after {
                Some(seq) => format!("/requests/{}/messages?after={}", request_id, seq),
                None => format!("/requests/{}/messages", request_id),
            };
            let body = client.get(&path)?;
            if json {
                return print_json(&body);
            }
            let messages: Vec<MessageView> = parse_list(&body, "messages")?;
            for m in &messages {
                println!("{}", format_message(m));
            }
        }
        Commands::Close {
            request_id,
            responder,
        } => {
            let by = if responder.is_some() { "responder" } else { "requester" };
            let body = client.post(
                &format!("/requests/{}/close", request_id),
                serde_json::json!({ "by": by, "responder_id": responder }),
            )?;
            if json {
                return print_json(&body);
            }
            println!("Session: {}", body["state"].as_str().unwrap_or("?"));
        }
        Commands::Availability {
            responder_id,
            availability,
        } => {
            let body = client.put(
                &format!("/responders/{}/availability", responder_id),
                serde_json::json!({ "availability": availability }),
            )?;
            if json {
                return print_json(&body);
            }
            println!(
                "{}: {}",
                body["name"].as_str().unwrap_or(&responder_id),
                body["availability"].as_str().unwrap_or("?")
            );
        }
        Commands::Status => {
            let body = client.get("/health")?;
            if json {
                return print_json(&body);
            }
            println!("Vetline server: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:        {}", body["version"].as_str().unwrap_or("?"));
            println!(
                "Responders:     {} ({} available)",
                body["responders"], body["available_responders"]
            );
            println!(
                "Sessions:       {} ({} open)",
                body["sessions"], body["open_sessions"]
            );
            println!("Assistant:      {}", body["assistant_backend"].as_str().unwrap_or("?"));
        }
    }

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("vetline-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &str, distance_km: f64) -> CandidateView {
        CandidateView {
            responder: ResponderView {
                id: "vet-1".to_string(),
                name: name.to_string(),
                rating_average: 4.9,
            },
            distance_km,
            estimated_response_minutes: 4,
            score: 0.80812,
        }
    }

    // ========================================================================
    // TEST 1: candidate line carries rank, distance, rating and id
    // ========================================================================
    #[test]
    fn test_format_candidate() {
        let line = format_candidate(1, &candidate("Dra. María González", 1.04));
        assert!(line.starts_with(" 1. Dra. María González"));
        assert!(line.contains("1.0 km"));
        assert!(line.contains("★ 4.9"));
        assert!(line.contains("~4 min"));
        assert!(line.contains("(score 0.808)"));
        assert!(line.ends_with("[vet-1]"));
    }

    // ========================================================================
    // TEST 2: message line shows seq, clock time and sender
    // ========================================================================
    #[test]
    fn test_format_message() {
        let m = MessageView {
            seq: 7,
            sender: "assistant".to_string(),
            content: "Keep your pet calm.".to_string(),
            sent_at: "2026-03-01T14:05:33.120Z".to_string(),
        };
        assert_eq!(format_message(&m), "[7] 14:05 assistant: Keep your pet calm.");
    }

    // ========================================================================
    // TEST 3: error bodies from the gateway are surfaced with their code
    // ========================================================================
    #[test]
    fn test_format_error() {
        let body = serde_json::json!({
            "status": "error",
            "code": "conflict",
            "error": "Conflict: request has already been accepted"
        });
        assert_eq!(
            format_error(409, &body),
            "Conflict: request has already been accepted (conflict, HTTP 409)"
        );
        assert_eq!(format_error(502, &serde_json::Value::Null), "server returned HTTP 502");
    }

    // ========================================================================
    // TEST 4: candidate lists parse from the gateway payload
    // ========================================================================
    #[test]
    fn test_parse_candidates_payload() {
        let body = serde_json::json!({
            "count": 1,
            "candidates": [{
                "responder": { "id": "vet-2", "name": "Dr. Carlos Rodríguez", "rating_average": 4.8,
                               "specialties": ["surgery"], "availability": "available" },
                "distance_km": 3.2,
                "estimated_response_minutes": 12,
                "distance_score": 0.5, "rating_score": 0.96, "response_score": 0.0,
                "score": 0.538
            }]
        });
        let parsed: Vec<CandidateView> = parse_list(&body, "candidates").unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].responder.id, "vet-2");
        assert_eq!(parsed[0].estimated_response_minutes, 12);
    }

    // ========================================================================
    // TEST 5: CLI parses negative coordinates
    // ========================================================================
    #[test]
    fn test_cli_parses_submit() {
        let cli = Cli::try_parse_from([
            "vetline-cli", "submit", "vomiting and lethargy", "--pet-name", "Max", "--species", "dog",
            "--age", "5", "--lat", "-34.6037", "--lng", "-58.3816", "--radius", "2",
        ])
        .unwrap();
        match cli.command {
            Commands::Submit { lat, lng, radius, .. } => {
                assert_eq!(lat, -34.6037);
                assert_eq!(lng, -58.3816);
                assert_eq!(radius, Some(2.0));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
