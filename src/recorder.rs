// ===============================
// src/recorder.rs
// ===============================
//
// JSONL audit recorder, ringan & tahan banting:
// - Tulis setiap Event (decision/placed/rejected/rebuilt) ke file .jsonl (append).
// - Bufer dengan BufWriter agar hemat syscall.
// - Flush periodik tiap 1s dan/atau tiap 100 event.
// - Otomatis membuat parent directory jika belum ada.
// - Jika tulis gagal, coba reopen file dan lanjut.
//
// ENV: set `RECORD_FILE=/path/to/audit.jsonl` agar aktif (lihat main.rs).
//
use chrono::Utc;
use std::path::Path;
use tokio::{
    fs::{self, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{error, info};

use crate::domain::Event;

const FLUSH_EVERY_N_EVENTS: u32 = 100;

pub fn now_ts() -> String {
    Utc::now().to_rfc3339()
}

async fn open_writer(path: &str) -> std::io::Result<BufWriter<fs::File>> {
    // Pastikan parent directory ada (kalau ada)
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = fs::create_dir_all(parent).await {
                error!(?e, %path, "recorder: create_dir_all failed");
            }
        }
    }
    let file = OpenOptions::new().create(true).append(true).open(path).await?;
    Ok(BufWriter::new(file))
}

async fn write_line(writer: &mut BufWriter<fs::File>, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await
}

pub async fn run(mut rx: mpsc::Receiver<Event>, path: String) {
    info!(%path, "recorder: started");
    let mut writer = match open_writer(&path).await {
        Ok(w) => w,
        Err(e) => {
            error!(?e, %path, "recorder: open failed, audit trail disabled");
            return;
        }
    };

    let mut tick = interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut since_last_flush: u32 = 0;

    loop {
        tokio::select! {
            maybe_ev = rx.recv() => {
                let Some(ev) = maybe_ev else {
                    // Channel closed: flush dan keluar
                    let _ = writer.flush().await;
                    info!("recorder: channel closed, stopped");
                    break;
                };
                let line = match serde_json::to_string(&ev) {
                    Ok(s) => s,
                    Err(e) => {
                        error!(?e, "recorder: serialize error, skip event");
                        continue;
                    }
                };

                if let Err(e) = write_line(&mut writer, &line).await {
                    error!(?e, "recorder: write failed, attempting reopen");
                    match open_writer(&path).await {
                        Ok(w) => {
                            writer = w;
                            // coba lagi sekali setelah reopen
                            if let Err(e2) = write_line(&mut writer, &line).await {
                                error!(?e2, "recorder: write failed again after reopen, drop event");
                                continue;
                            }
                        }
                        Err(e2) => {
                            error!(?e2, "recorder: reopen failed, drop event");
                            continue;
                        }
                    }
                }

                since_last_flush += 1;
                if since_last_flush >= FLUSH_EVERY_N_EVENTS {
                    let _ = writer.flush().await;
                    since_last_flush = 0;
                }
            }

            _ = tick.tick() => {
                let _ = writer.flush().await;
                since_last_flush = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AccountState;

    #[tokio::test]
    async fn writes_one_json_line_per_event() {
        let path = std::env::temp_dir()
            .join(format!("grid_audit_{}_{}.jsonl", std::process::id(), rand::random::<u32>()))
            .to_string_lossy()
            .to_string();
        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(run(rx, path.clone()));

        tx.send(Event::Decision {
            ts: now_ts(),
            account: "LONG".into(),
            state: AccountState::Missing,
            reason: Some("no saved grid".into()),
        })
        .await
        .unwrap();
        tx.send(Event::Note("hello".into())).await.unwrap();
        drop(tx);
        task.await.unwrap();

        let body = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"Decision\""));
        assert!(lines[0].contains("\"Missing\""));
        let _ = tokio::fs::remove_file(&path).await;
    }
}
