//! Interactive operator console
//!
//! A small REPL over the shared action layer: draw and retire stops, toggle
//! couplers, move swell boxes, simulate keys, inspect state, panic.

use crate::actions::Actions;
use crate::engine::RegistrationAck;
use crate::registry::Division;
use anyhow::Result;
use colored::*;
use rustyline::DefaultEditor;
use std::sync::Arc;

const HELP: &str = "\
Commands:
  stops [division]        list stops (drawn ones highlighted)
  draw <stop>             draw a stop
  retire <stop>           retire a stop
  coupler <id>            toggle a coupler
  swell <division> <0-127> set a swell box position
  trem <group> on|off     engage/disengage a tremulant
  key <division> <note> on|off   simulate a key event
  status                  condensed status
  state                   full engine state
  clear                   withdraw all stops
  panic                   all notes off everywhere, reset tracking
  quit                    exit";

/// Run the REPL until the operator quits or input closes
pub async fn run_repl(actions: Arc<Actions>) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    println!("{}", "organ-master console — 'help' for commands".bold());

    loop {
        let line = match rl.readline("organ> ") {
            Ok(line) => line,
            Err(_) => break,
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(line);

        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts[0] {
            "quit" | "exit" => break,
            "help" => println!("{}", HELP),

            "stops" => {
                let division = match parts.get(1) {
                    Some(raw) => match Division::parse(raw) {
                        Some(d) => Some(d),
                        None => {
                            eprintln!("{} unknown division '{}'", "error:".red(), raw);
                            continue;
                        }
                    },
                    None => None,
                };
                for stop in actions.list_stops(division).await {
                    let marker = if stop.active { "●".green() } else { "○".normal() };
                    println!("  {} {:<28} {} [{}]", marker, stop.id, stop.name, stop.division);
                }
            }

            "draw" | "retire" | "toggle" => match parts.get(1) {
                None => eprintln!("{} usage: {} <stop>", "error:".red(), parts[0]),
                Some(id) => {
                    let result = match parts[0] {
                        "draw" => actions.draw_stop(id).await,
                        "retire" => actions.retire_stop(id).await,
                        _ => actions.toggle_stop(id).await,
                    };
                    match result {
                        Ok(RegistrationAck::Stop { id, name, drawn }) => {
                            let verb = if drawn { "drawn".green() } else { "withdrawn".yellow() };
                            println!("  {} {} ({})", verb, id, name);
                        }
                        Ok(_) => {}
                        Err(e) => eprintln!("{} {}", "error:".red(), e),
                    }
                }
            },

            "coupler" => match parts.get(1) {
                None => eprintln!("{} usage: coupler <id>", "error:".red()),
                Some(id) => match actions.toggle_coupler(id).await {
                    Ok(RegistrationAck::Coupler { id, engaged }) => {
                        let verb = if engaged { "engaged".green() } else { "disengaged".yellow() };
                        println!("  {} {}", verb, id);
                    }
                    Ok(_) => {}
                    Err(e) => eprintln!("{} {}", "error:".red(), e),
                },
            },

            "swell" => {
                let (Some(raw_division), Some(raw_position)) = (parts.get(1), parts.get(2)) else {
                    eprintln!("{} usage: swell <division> <0-127>", "error:".red());
                    continue;
                };
                let Some(division) = Division::parse(raw_division) else {
                    eprintln!("{} unknown division '{}'", "error:".red(), raw_division);
                    continue;
                };
                let Ok(position) = raw_position.parse::<u8>() else {
                    eprintln!("{} position must be 0-127", "error:".red());
                    continue;
                };
                match actions.set_swell(division, position).await {
                    Ok(_) => println!("  swell {} -> {}", division, position),
                    Err(e) => eprintln!("{} {}", "error:".red(), e),
                }
            }

            "trem" => {
                let (Some(group), Some(switch)) = (parts.get(1), parts.get(2)) else {
                    eprintln!("{} usage: trem <group> on|off", "error:".red());
                    continue;
                };
                let engaged = *switch == "on";
                match actions.set_tremulant(group, engaged).await {
                    Ok(_) => println!("  tremulant {} {}", group, switch),
                    Err(e) => eprintln!("{} {}", "error:".red(), e),
                }
            }

            "key" => {
                let (Some(raw_division), Some(raw_note), Some(switch)) =
                    (parts.get(1), parts.get(2), parts.get(3))
                else {
                    eprintln!("{} usage: key <division> <note> on|off", "error:".red());
                    continue;
                };
                let Some(division) = Division::parse(raw_division) else {
                    eprintln!("{} unknown division '{}'", "error:".red(), raw_division);
                    continue;
                };
                let Ok(note) = raw_note.parse::<u8>() else {
                    eprintln!("{} note must be 0-127", "error:".red());
                    continue;
                };
                if note > 127 {
                    eprintln!("{} note must be 0-127", "error:".red());
                    continue;
                }
                actions.simulate_key(division, note, *switch == "on");
                println!("  key {} {} {}", division, note, switch);
            }

            "status" => {
                let report = actions.status().await;
                println!(
                    "  stops drawn: {}  couplers: {}  keys down: {}  notes sounding: {}",
                    report.active_stops.len().to_string().cyan(),
                    report.engaged_couplers.len().to_string().cyan(),
                    report.active_keys_count.to_string().cyan(),
                    report.active_notes_count.to_string().cyan(),
                );
                for stop in &report.active_stops {
                    println!("    ● {} [{}]", stop.id, stop.division);
                }
                if !report.degraded_outputs.is_empty() {
                    println!(
                        "  {} {}",
                        "degraded outputs:".red(),
                        report.degraded_outputs.join(", ")
                    );
                }
            }

            "state" => {
                let snapshot = actions.state().await;
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            }

            "clear" => match actions.all_clear().await {
                Ok(count) => println!("  {} stop(s) withdrawn", count),
                Err(e) => eprintln!("{} {}", "error:".red(), e),
            },

            "panic" => {
                let outputs = actions.panic().await;
                println!("  {} ({} addresses swept)", "PANIC sent".red().bold(), outputs);
            }

            other => eprintln!("{} unknown command '{}', try 'help'", "error:".red(), other),
        }
    }

    Ok(())
}
