use std::sync::mpsc;
use std::time::{Duration, Instant};

use anyhow::bail;
use clap::ArgMatches;

use radio_morse::audio::sink::{AudioSink, CpalSink, NullSink};
use radio_morse::{Error, Generator, KeyBridge, Receiver};

mod args;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let matches = args::parse_args();
    match matches.subcommand() {
        Some(("send", m)) => send(m),
        Some(("echo", m)) => echo(m),
        _ => unreachable!("a subcommand is required"),
    }
}

fn make_sink(m: &ArgMatches) -> anyhow::Result<Box<dyn AudioSink + Send>> {
    if m.get_flag("null") {
        return Ok(Box::new(PacedSink::new(44_100)));
    }

    let device = m.get_one::<String>("output-device").unwrap();
    Ok(Box::new(CpalSink::new(Some(device))?))
}

fn configure(gen: &Generator, m: &ArgMatches) -> radio_morse::Result<()> {
    gen.set_speed(*m.get_one::<i32>("wpm").unwrap())?;
    gen.set_frequency(*m.get_one::<i32>("frequency").unwrap())?;
    gen.set_volume(*m.get_one::<i32>("volume").unwrap())?;
    gen.set_gap(*m.get_one::<i32>("gap").unwrap())?;
    gen.set_weighting(*m.get_one::<i32>("weighting").unwrap())
}

fn send(m: &ArgMatches) -> anyhow::Result<()> {
    let text = m.get_one::<String>("text").unwrap().to_uppercase();

    let mut gen = Generator::new(make_sink(m)?);
    configure(&gen, m)?;

    gen.start()?;
    gen.enqueue_string(&text)?;
    gen.tone_queue().wait_for_level(0);
    gen.stop()?;

    if let Some(e) = gen.last_error() {
        bail!("audio sink failed: {e}");
    }
    Ok(())
}

fn echo(m: &ArgMatches) -> anyhow::Result<()> {
    let text = m.get_one::<String>("text").unwrap().to_uppercase();

    let mut gen = Generator::new(make_sink(m)?);
    configure(&gen, m)?;

    let mut rec = Receiver::new();
    if m.get_flag("adaptive") {
        rec.set_adaptive(true);
    } else {
        rec.set_speed(*m.get_one::<i32>("wpm").unwrap())?;
    }

    // Wire the generator's keying edges into the receiver via a channel, so
    // decoding happens on this thread.
    let (edges_tx, edges) = mpsc::channel();
    gen.set_key_bridge(KeyBridge::new(move |at, down| {
        let _ = edges_tx.send((at, down));
    }));

    gen.start()?;
    gen.enqueue_string(&text)?;

    // A character is polled out once its gap matures; a space only once the
    // gap outgrows it, so keep the buffer around until the next key down.
    let mut pending_space = false;
    let mut drained_at = None;
    loop {
        match edges.recv_timeout(Duration::from_millis(10)) {
            Ok((at, down)) => {
                if down && pending_space {
                    rec.clear_buffer();
                    pending_space = false;
                }
                let result = if down {
                    rec.mark_begin(Some(at))
                } else {
                    rec.mark_end(Some(at))
                };
                if let Err(e) = result {
                    if !e.is_transient() {
                        rec.clear_buffer();
                    }
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }

        if pending_space {
            if let Ok(c) = rec.poll_character(None) {
                if c.is_end_of_word {
                    print!(" ");
                    flush_stdout();
                    rec.clear_buffer();
                    pending_space = false;
                }
            }
        } else {
            match rec.poll_character(None) {
                Ok(c) => {
                    print!("{}", c.character);
                    flush_stdout();
                    pending_space = true;
                }
                Err(Error::Unrecognizable) => {
                    print!("?");
                    flush_stdout();
                    rec.clear_buffer();
                }
                Err(_) => {}
            }
        }

        // Leave time after the queue drains for the last word gap to mature.
        if gen.tone_queue().is_empty() {
            let done_since = *drained_at.get_or_insert_with(Instant::now);
            if done_since.elapsed() > Duration::from_secs(2) {
                break;
            }
        } else {
            drained_at = None;
        }
    }

    println!();
    gen.stop()?;
    Ok(())
}

fn flush_stdout() {
    use std::io::Write;
    let _ = std::io::stdout().flush();
}

/// A null sink that takes as long as a sound card would: `echo --null` needs
/// real-time pacing for the receiver's timing to mean anything.
struct PacedSink {
    inner: NullSink,
}

impl PacedSink {
    fn new(sample_rate: u32) -> Self {
        Self {
            inner: NullSink::new(sample_rate),
        }
    }
}

impl AudioSink for PacedSink {
    fn open(&mut self) -> radio_morse::Result<()> {
        self.inner.open()
    }

    fn write(&mut self, samples: &[i16]) -> radio_morse::Result<usize> {
        let micros = samples.len() as u64 * 1_000_000 / self.inner.sample_rate() as u64;
        std::thread::sleep(Duration::from_micros(micros));
        self.inner.write(samples)
    }

    fn close(&mut self) {
        self.inner.close();
    }

    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn max_buffer_samples(&self) -> usize {
        // Short buffers keep the keying-edge timestamps close to the
        // schedule, which `echo` depends on.
        256
    }
}
