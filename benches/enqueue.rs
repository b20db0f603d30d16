use ro_channel::{BackoffPolicy, Runtime, RuntimeConfig, ShmRegion, Stat, Trials, mono_time_ns};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

#[cfg(not(unix))]
compile_error!("This crate only supports Unix-like operating systems.");

const SHM_NAME: &str = "/ro_channel_bench";
const QUEUE_CAPACITY: usize = 256;
const THREADS: usize = 4;
const TRIALS: usize = 100_000;

fn config() -> RuntimeConfig {
    RuntimeConfig::default()
        .with_queue_capacity(QUEUE_CAPACITY)
        .with_threads_per_channel(THREADS)
        .with_completion_backoff(BackoffPolicy::Spin)
}

fn main() -> ro_channel::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        usage(&args[0]);
    }

    match args[1].as_str() {
        "local" => local(),
        "host" => host(),
        "device" => device(),
        _ => usage(&args[0]),
    }
}

fn usage(program: &str) -> ! {
    eprintln!("Usage: {program} local|host|device");
    std::process::exit(1);
}

/// Producers and drain in one process over a heap pool.
#[inline(never)]
fn local() -> ro_channel::Result<()> {
    let rt = Runtime::new(config())?;
    let group = rt.group(0, THREADS)?;
    let stop = AtomicBool::new(false);
    let nbi = Mutex::new(Trials::with_capacity(TRIALS * THREADS));
    let blocking = Mutex::new(Trials::with_capacity(TRIALS * THREADS));

    std::thread::scope(|s| {
        s.spawn(|| {
            let mut drain = rt.drain(0).expect("drain");
            drain.serve(BackoffPolicy::Spin, &stop, |_| {});
        });
        group.launch(|ctx| {
            let buf = [0u8; 64];
            let mut local_nbi = Vec::with_capacity(TRIALS);
            let mut local_blocking = Vec::with_capacity(TRIALS / 16);
            for i in 0..TRIALS {
                let ts0 = mono_time_ns();
                if i % 16 == 15 {
                    ctx.quiet();
                    local_blocking.push(mono_time_ns() - ts0);
                } else {
                    ctx.put_nbi(std::ptr::null_mut(), buf.as_ptr(), buf.len(), 1);
                    local_nbi.push(mono_time_ns() - ts0);
                }
            }
            let mut nbi = nbi.lock().unwrap();
            local_nbi.into_iter().for_each(|t| nbi.push(t));
            let mut blocking = blocking.lock().unwrap();
            local_blocking.into_iter().for_each(|t| blocking.push(t));
        });
        stop.store(true, Ordering::Release);
    });

    let mut nbi = nbi.into_inner().unwrap();
    let mut blocking = blocking.into_inner().unwrap();
    nbi.sort();
    blocking.sort();
    nbi.print_csv("put_nbi");
    blocking.print_csv("quiet");
    print_profile(&rt)
}

/// Creates the shared pool and drains it until the device side has posted
/// every command.
#[inline(never)]
fn host() -> ro_channel::Result<()> {
    let _ = ShmRegion::unlink(SHM_NAME);
    let rt = Runtime::create_shared(SHM_NAME, config())?;
    let mut drain = rt.drain(0)?;
    let mut trials = Trials::with_capacity(TRIALS);

    // One command per trial plus the group's FINALIZE.
    let mut seen = 0;
    while seen < TRIALS + 1 {
        seen += drain.poll(|req| {
            // `src` carries the producer's timestamp.
            if req.index < TRIALS as u64 {
                trials.push(mono_time_ns().saturating_sub(req.body.src));
            }
        });
    }

    trials.sort();
    trials.print_csv("host_latency");
    ShmRegion::unlink(SHM_NAME)?;
    Ok(())
}

/// Attaches to the host's pool and posts timestamped non-blocking puts.
#[inline(never)]
fn device() -> ro_channel::Result<()> {
    let rt = Runtime::open_shared(SHM_NAME, config())?;
    let group = rt.group(0, 1)?;
    let mut trials = Trials::with_capacity(TRIALS);

    let ctx = group.enter(0);
    for _ in 0..TRIALS {
        let ts0 = mono_time_ns();
        ctx.put_nbi(std::ptr::null_mut(), ts0 as usize as *const u8, 0, 0);
        trials.push(mono_time_ns() - ts0);
    }
    group.exit(ctx);

    trials.sort();
    trials.print_csv("device_enqueue");
    print_profile(&rt)
}

fn print_profile<R: ro_channel::Region>(rt: &Runtime<R>) -> ro_channel::Result<()> {
    let profile = rt.profile(0)?;
    println!("stat,events,total_ns");
    for stat in Stat::ALL {
        println!("{},{},{}", stat.name(), profile.events(stat), profile.time_ns(stat));
    }
    Ok(())
}
