//! Records a small simulated game loop on two threads, follows the main
//! thread with a view, prints the aggregated tree and writes a Chrome trace.

use framescope::{export, scope, ConnectionState, Registry, View};
use std::error::Error;
use std::path::Path;
use std::thread;
use std::time::Duration;

fn spin(micros: u64) {
    let until = framescope::clock::now() + micros as f64 / 1e6;
    while framescope::clock::now() < until {
        std::hint::spin_loop();
    }
}

fn update() {
    let _scope = scope!("update");
    for _ in 0..3 {
        let _scope = scope!("physics step");
        spin(200);
    }
}

fn render() {
    let _scope = scope!("render");
    spin(300);
}

fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    framescope::clock::init();
    let registry = Registry::global();
    registry.mark_main_thread();

    let loader = thread::Builder::new().name("loader".into()).spawn(|| {
        for _ in 0..20 {
            {
                let _scope = scope!("load chunk");
                spin(500);
            }
            framescope::end_frame();
        }
    })?;

    let view = View::new(registry);
    view.connect("main", Duration::from_secs(5));

    for _ in 0..30 {
        {
            let _frame = scope!("frame");
            update();
            render();
        }
        // Also hands this thread's frame to the view.
        view.tick_frame();
    }

    if loader.join().is_err() {
        return Err("loader thread panicked".into());
    }

    assert_eq!(view.state(), ConnectionState::Connected);
    println!("recorders: {:?}", registry.list_recorder_names());
    view.read(|tree| print!("{}", tree));

    let path = export::dump_chrome_trace(registry, Path::new("."), None)?;
    println!("trace written to {}", path.display());

    Ok(())
}
