// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Chat demo over the label fabric.
//
// Usage: demo_chat <node_id>   (run multiple instances in separate terminals
// with distinct node ids 0..19; they discover each other over the discovery
// multicast group and exchange chat lines over a shared label.)
//
// Type a message and press Enter to broadcast it. Type "q" to quit.

use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use eroil::{init_manager, SignalMode};

const CHAT_LABEL: i32 = 2;
const SLOT_SIZE: usize = 4096;
const NUM_SLOTS: usize = 8;
const QUIT: &str = "q";

fn write_test_mode_cfg(node_id: i32) -> std::io::Result<std::path::PathBuf> {
    let path = std::env::temp_dir().join(format!("eroil_demo_chat_{node_id}.cfg"));
    let mut f = std::fs::File::create(&path)?;
    writeln!(f, "mode=TestLocalShmOnly")?;
    Ok(path)
}

/// Pads to a 4-byte boundary: `msg_size_in_words` only reports whole words
/// (spec.md §6), so odd-length text would otherwise lose its tail.
fn pad_to_word(mut msg: Vec<u8>) -> Vec<u8> {
    while msg.len() % 4 != 0 {
        msg.push(0);
    }
    msg
}

fn main() {
    env_logger::init();
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("usage: demo_chat <node_id>");
        std::process::exit(1);
    }
    let node_id: i32 = args[1].parse().expect("node_id");
    let id = format!("c{node_id}");

    let cfg_path = write_test_mode_cfg(node_id).expect("write manager cfg");
    let ctx = init_manager(node_id, cfg_path.to_str().unwrap(), "").expect("init_manager");

    let send_handle = ctx.open_send(CHAT_LABEL, SLOT_SIZE, None, NUM_SLOTS).expect("open_send");
    let recv_handle = ctx
        .open_recv(CHAT_LABEL, SLOT_SIZE, SLOT_SIZE, NUM_SLOTS, false, None, NUM_SLOTS, SignalMode::EveryMessage)
        .expect("open_recv");

    let quit = Arc::new(AtomicBool::new(false));
    let recv_thread = {
        let recv_handle = Arc::clone(&recv_handle);
        let quit = Arc::clone(&quit);
        let id_recv = id.clone();
        thread::spawn(move || {
            println!("{id_recv} is ready.");
            let mut next_slot = 0usize;
            while !quit.load(Ordering::Acquire) {
                if recv_handle.recv_count() == 0 {
                    thread::sleep(Duration::from_millis(100));
                    continue;
                }
                let iosb = recv_handle.take_iosb(next_slot);
                next_slot = (next_slot + 1) % NUM_SLOTS;
                recv_handle.recv_dismiss(1);

                let len = (iosb.msg_size_in_words as usize) * 4;
                let text = unsafe { std::slice::from_raw_parts(iosb.msg_addr as *const u8, len) };
                let dat = String::from_utf8_lossy(text);
                let dat = dat.trim_end_matches('\0');
                println!("{dat}");
            }
            println!("{id_recv} receiver is quit...");
        })
    };

    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush().ok();
        let mut line = String::new();
        if stdin.lock().read_line(&mut line).is_err() || line.trim().is_empty() {
            break;
        }
        let trimmed = line.trim();
        if trimmed == QUIT {
            break;
        }
        let msg = pad_to_word(format!("{id}> {trimmed}\0").into_bytes());
        let mut buf = vec![0u8; SLOT_SIZE];
        let n = msg.len().min(SLOT_SIZE);
        buf[..n].copy_from_slice(&msg[..n]);
        if let Err(e) = ctx.send_label(&send_handle, &buf, 0) {
            eprintln!("send failed: {e}");
        }
    }

    quit.store(true, Ordering::Release);
    recv_thread.join().unwrap();
    ctx.close_send(&send_handle);
    ctx.close_recv(&recv_handle);
    println!("{id} sender is quit...");
}
