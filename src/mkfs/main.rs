// Build a filesystem image on the host.
//
// mkfs IMAGE SECTORS [FILE]...
//
// Formats IMAGE as a SECTORS-sector volume and imports each named host
// file into the root directory, then prints a listing of what it built.

use sectorfs::{FileDisk, Filesys, Request, Session};
use std::env;
use std::fs;
use std::path::Path;
use std::process;
use std::sync::Arc;

fn die(msg: &str) -> ! {
    eprintln!("mkfs: {}", msg);
    process::exit(1);
}

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        die("usage: mkfs IMAGE SECTORS [FILE]...");
    }
    let sectors: u32 = match args[2].parse() {
        Ok(n) if n > 64 => n,
        _ => die("SECTORS must be a number greater than 64"),
    };

    let disk = match FileDisk::create(&args[1], sectors) {
        Ok(d) => Arc::new(d),
        Err(e) => die(&format!("cannot create {}: {}", args[1], e)),
    };
    let fs = match Filesys::format(disk.clone()) {
        Ok(fs) => fs,
        Err(e) => die(&format!("format failed: {}", e)),
    };
    let mut session = match Session::new(fs) {
        Ok(s) => s,
        Err(e) => die(&format!("cannot open root: {}", e)),
    };

    for arg in &args[3..] {
        let data = match fs::read(arg) {
            Ok(d) => d,
            Err(e) => die(&format!("cannot read {}: {}", arg, e)),
        };
        let name = match Path::new(arg).file_name().and_then(|n| n.to_str()) {
            Some(n) => n,
            None => die(&format!("bad file name: {}", arg)),
        };

        if session.dispatch(Request::Create {
            path: name,
            initial_size: 0,
        }) < 0
        {
            die(&format!("cannot create {}", name));
        }
        let fd = session.dispatch(Request::Open { path: name });
        if fd < 0 {
            die(&format!("cannot open {}", name));
        }
        let written = session.dispatch(Request::Write {
            fd: fd as usize,
            buf: &data,
        });
        if written != data.len() as i64 {
            die(&format!("short write importing {}", name));
        }
        session.dispatch(Request::Close { fd: fd as usize });
        println!("mkfs: imported {} ({} bytes)", name, data.len());
    }

    let root = session.dispatch(Request::Open { path: "/" });
    if root < 0 {
        die("cannot list root");
    }
    let mut name = String::new();
    while session.dispatch(Request::ReadDir {
        fd: root as usize,
        name: &mut name,
    }) == 1
    {
        println!("mkfs: /{}", name);
    }
    session.dispatch(Request::Close { fd: root as usize });

    if let Err(e) = session.fs().flush() {
        die(&format!("flush failed: {}", e));
    }
    if let Err(e) = disk.sync() {
        die(&format!("sync failed: {}", e));
    }
    println!(
        "mkfs: {} ready, {} sectors, {} free",
        args[1],
        sectors,
        session.fs().free_sectors()
    );
}
