//! The operator's interactive command loop, run concurrently with the
//! seeder's accept loop by `serve`. Lines are the same verbs the
//! subcommands expose; `exit` withdraws from every announced tracker
//! before returning.

use fabric_core::Config;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::commands;
use crate::session::AnnouncedSet;

const MENU: &str = "\
create <tracker> <file...>          build a descriptor
download <torrent_name> <peer...>   fetch a descriptor's files
test <peer_addr>                    probe a peer
announcetotracker <tracker> <name>  announce a held file
getlistofpeers <tracker> <name>     list a file's peers
getlistoftrackers                   list this session's announcements
menu                                show this text
clear                               clear the screen
exit                                withdraw and quit";

pub async fn run(config: Config, self_addr: String) {
    let mut announced = AnnouncedSet::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("{MENU}");
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "error reading operator input");
                break;
            }
        };
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some(&verb) = words.first() else {
            continue;
        };

        let result = dispatch(&config, &self_addr, verb, &words[1..], &mut announced).await;
        match result {
            Ok(true) => break,
            Ok(false) => {}
            Err(e) => println!("error: {e:#}"),
        }
    }

    commands::withdraw_all(&self_addr, &announced, config.handshake_timeout).await;
}

/// Returns `Ok(true)` when the loop should stop (`exit`).
async fn dispatch(
    config: &Config,
    self_addr: &str,
    verb: &str,
    args: &[&str],
    announced: &mut AnnouncedSet,
) -> anyhow::Result<bool> {
    match verb {
        "create" => {
            let [tracker, files @ ..] = args else {
                anyhow::bail!("usage: create <tracker> <file...>");
            };
            let files: Vec<String> = files.iter().map(|s| s.to_string()).collect();
            commands::create(config, tracker, &files).await?;
        }
        "download" => {
            let [torrent_name, peers @ ..] = args else {
                anyhow::bail!("usage: download <torrent_name> <peer_addr...>");
            };
            let peers: Vec<String> = peers.iter().map(|s| s.to_string()).collect();
            commands::download(config, self_addr, torrent_name, &peers, announced).await?;
        }
        "test" => {
            let [peer_addr] = args else {
                anyhow::bail!("usage: test <peer_addr>");
            };
            commands::test_peer(config, peer_addr).await?;
        }
        "announcetotracker" => {
            let [tracker, torrent_name] = args else {
                anyhow::bail!("usage: announcetotracker <tracker> <torrent_name>");
            };
            commands::announce_to_tracker(
                self_addr,
                tracker,
                torrent_name,
                config.handshake_timeout,
                announced,
            )
            .await?;
        }
        "getlistofpeers" => {
            let [tracker, torrent_name] = args else {
                anyhow::bail!("usage: getlistofpeers <tracker> <torrent_name>");
            };
            commands::list_peers(tracker, torrent_name, config.handshake_timeout).await?;
        }
        "getlistoftrackers" => {
            commands::list_trackers(announced);
        }
        "menu" => println!("{MENU}"),
        "clear" => print!("\x1B[2J\x1B[1;1H"),
        "exit" => return Ok(true),
        other => println!("unknown command: {other} (type \"menu\" for help)"),
    }
    Ok(false)
}
