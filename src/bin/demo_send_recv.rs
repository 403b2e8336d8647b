// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Two-process demo of the label fabric's send/recv path.
//
// Usage:
//   demo_send_recv <node_id> send <size> <interval_ms>
//   demo_send_recv <node_id> recv <interval_ms>
//
// Both instances run in `TestLocalShmOnly` mode against the same fake
// 20-node local roster, so they exchange records over shared memory without
// a real manager config or peer roster file on disk.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use eroil::{init_manager, SignalMode};

const LABEL: i32 = 1;
const NUM_SLOTS: usize = 8;

fn write_test_mode_cfg() -> std::io::Result<std::path::PathBuf> {
    let path = std::env::temp_dir().join(format!("eroil_demo_send_recv_{}.cfg", std::process::id()));
    let mut f = std::fs::File::create(&path)?;
    writeln!(f, "mode=TestLocalShmOnly")?;
    Ok(path)
}

fn do_send(node_id: i32, size: usize, interval_ms: u64, quit: Arc<AtomicBool>) {
    let cfg_path = write_test_mode_cfg().expect("write manager cfg");
    let ctx = init_manager(node_id, cfg_path.to_str().unwrap(), "").expect("init_manager");
    let handle = ctx.open_send(LABEL, size, None, NUM_SLOTS).expect("open_send");
    println!("send: publishing label {LABEL}, waiting for receiver...");

    let buffer = vec![b'A'; size];
    while !quit.load(Ordering::Acquire) {
        match ctx.send_label(&handle, &buffer, 0) {
            Ok(()) => println!("send: sent {size} bytes"),
            Err(e) => eprintln!("send failed: {e}"),
        }
        thread::sleep(Duration::from_millis(interval_ms));
    }
    ctx.close_send(&handle);
}

fn do_recv(node_id: i32, interval_ms: u64, quit: Arc<AtomicBool>) {
    let cfg_path = write_test_mode_cfg().expect("write manager cfg");
    let ctx = init_manager(node_id, cfg_path.to_str().unwrap(), "").expect("init_manager");
    let slot_size = 64 * 1024;
    let handle = ctx
        .open_recv(LABEL, slot_size, slot_size, NUM_SLOTS, false, None, NUM_SLOTS, SignalMode::EveryMessage)
        .expect("open_recv");

    println!("recv: subscribed to label {LABEL}");
    while !quit.load(Ordering::Acquire) {
        let pending = ctx.recv_count(&handle);
        if pending == 0 {
            thread::sleep(Duration::from_millis(interval_ms));
            continue;
        }
        println!("recv: {pending} record(s) pending");
        ctx.recv_dismiss(&handle, pending);
    }
    ctx.close_recv(&handle);
}

fn main() {
    env_logger::init();
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 4 {
        eprintln!("usage: demo_send_recv <node_id> send <size> <interval_ms>");
        eprintln!("       demo_send_recv <node_id> recv <interval_ms>");
        std::process::exit(1);
    }
    let node_id: i32 = args[1].parse().expect("node_id");

    let quit = Arc::new(AtomicBool::new(false));
    {
        let q = Arc::clone(&quit);
        ctrlc_or_sigterm(move || q.store(true, Ordering::Release));
    }

    match args[2].as_str() {
        "send" => {
            if args.len() < 5 {
                eprintln!("usage: demo_send_recv <node_id> send <size> <interval_ms>");
                std::process::exit(1);
            }
            let size: usize = args[3].parse().expect("size");
            let interval: u64 = args[4].parse().expect("interval");
            do_send(node_id, size, interval, quit);
        }
        "recv" => {
            let interval: u64 = args[3].parse().expect("interval");
            do_recv(node_id, interval, quit);
        }
        other => {
            eprintln!("unknown mode: {other}");
            std::process::exit(1);
        }
    }
}

// Minimal cross-platform signal hook: sets the flag on SIGINT / SIGTERM.
fn ctrlc_or_sigterm(f: impl Fn() + Send + 'static) {
    #[cfg(unix)]
    {
        use std::sync::Mutex;
        static CB: std::sync::OnceLock<Mutex<Box<dyn Fn() + Send>>> = std::sync::OnceLock::new();
        CB.get_or_init(|| Mutex::new(Box::new(f)));
        extern "C" fn handler(_: libc::c_int) {
            if let Some(cb) = CB.get() {
                if let Ok(g) = cb.lock() {
                    g();
                }
            }
        }
        unsafe {
            libc::signal(libc::SIGINT, handler as *const () as libc::sighandler_t);
            libc::signal(libc::SIGTERM, handler as *const () as libc::sighandler_t);
            libc::signal(libc::SIGHUP, handler as *const () as libc::sighandler_t);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = f;
    }
}

#[cfg(unix)]
extern crate libc;
