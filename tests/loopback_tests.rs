//! End-to-end tests over the send and receive paths: text scheduled by the
//! generator is fed back into a receiver, either with synthetic timestamps
//! taken straight from the schedule or through the key bridge in real time.

use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use radio_morse::audio::sink::{AudioSink, NullSink};
use radio_morse::timing::DOT_CALIBRATION;
use radio_morse::{Error, Generator, KeyBridge, Receiver, Tone};

/// Pull everything the generator has scheduled without starting it.
fn drain_schedule(gen: &Generator) -> Vec<Tone> {
    let tq = gen.tone_queue();
    let mut tones = Vec::new();
    while !tq.is_empty() {
        let (tone, _) = tq.dequeue().expect("queue not shut down");
        tones.push(tone);
    }
    tones
}

fn feed_poll(rec: &mut Receiver, at: Instant, pending: &mut bool, out: &mut String) {
    match rec.poll_character(Some(at)) {
        Ok(c) => {
            if !*pending {
                out.push(c.character);
            }
            if c.is_end_of_word {
                out.push(' ');
                rec.clear_buffer();
                *pending = false;
            } else {
                *pending = true;
            }
        }
        Err(Error::Unrecognizable) => {
            out.push('?');
            rec.clear_buffer();
            *pending = false;
        }
        Err(e) => assert!(e.is_transient(), "unexpected poll error: {e}"),
    }
}

/// Walk a schedule as if it had been keyed in real time, feeding edges and
/// polls to the receiver with timestamps derived from the tone durations.
fn decode_schedule(tones: &[Tone], rec: &mut Receiver) -> String {
    let mut now = Instant::now();
    let mut out = String::new();
    let mut pending_space = false;

    for tone in tones {
        if tone.frequency > 0 {
            if pending_space {
                rec.clear_buffer();
                pending_space = false;
            }
            rec.mark_begin(Some(now)).unwrap();
            now += Duration::from_micros(tone.duration_us as u64);
            rec.mark_end(Some(now)).unwrap();
        } else {
            now += Duration::from_micros(tone.duration_us as u64);
            feed_poll(rec, now, &mut pending_space, &mut out);
        }
    }

    // Anything still pending matures far past the last tone.
    feed_poll(
        rec,
        now + Duration::from_secs(10),
        &mut pending_space,
        &mut out,
    );

    out
}

#[test]
fn test_scheduled_text_decodes_back() {
    let gen = Generator::new(Box::new(NullSink::new(44_100)));
    gen.set_speed(20).unwrap();
    gen.enqueue_string("CQ DX DE N0CALL").unwrap();

    let mut rec = Receiver::new();
    rec.set_speed(20).unwrap();

    let tones = drain_schedule(&gen);
    let decoded = decode_schedule(&tones, &mut rec);
    assert_eq!(decoded.trim_end(), "CQ DX DE N0CALL");
}

#[test]
fn test_procedural_signs_decode_back() {
    let gen = Generator::new(Box::new(NullSink::new(44_100)));
    gen.set_speed(20).unwrap();
    gen.enqueue_string("K1ABC <").unwrap();

    let mut rec = Receiver::new();
    rec.set_speed(20).unwrap();

    let tones = drain_schedule(&gen);
    assert_eq!(decode_schedule(&tones, &mut rec).trim_end(), "K1ABC <");
}

#[test]
fn test_weighted_schedule_still_decodes() {
    // Heavy weighting stretches dots and shrinks dashes; the receiver's
    // default tolerance has to keep up.
    let gen = Generator::new(Box::new(NullSink::new(44_100)));
    gen.set_speed(20).unwrap();
    gen.set_weighting(60).unwrap();
    gen.enqueue_string("PARIS").unwrap();

    let mut rec = Receiver::new();
    rec.set_speed(20).unwrap();

    let tones = drain_schedule(&gen);
    assert_eq!(decode_schedule(&tones, &mut rec).trim_end(), "PARIS");
}

#[test]
fn test_paris_takes_three_seconds_of_samples() {
    let sink = NullSink::new(44_100);
    let written = sink.written();

    let mut gen = Generator::new(Box::new(sink));
    gen.set_speed(20).unwrap();
    gen.enqueue_string("PARIS").unwrap();

    gen.start().unwrap();
    gen.tone_queue().wait_for_level(0);
    gen.stop().unwrap();
    assert_eq!(gen.last_error(), None);

    // 50 units at 20 wpm is 3.0 s of audio; the sink only ever sees whole
    // buffers, so allow one buffer of zero padding on top.
    let unit = DOT_CALIBRATION / 20;
    let expected = 50 * unit * 44_100 / 1_000_000;
    let got = written.load(Ordering::SeqCst) as i64;
    assert!(
        got >= expected && got - expected <= 8192,
        "wrote {got} samples, scheduled {expected}"
    );
}

/// Null sink that takes as long as a real sound card would, so wall-clock
/// keying edges line up with the schedule.
struct PacedSink {
    inner: NullSink,
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
        // Keep the generator's buffers short so edge timestamps stay close
        // to the schedule.
        256
    }
}

#[test]
fn test_key_bridge_drives_receiver_in_real_time() {
    let mut gen = Generator::new(Box::new(PacedSink {
        inner: NullSink::new(44_100),
    }));
    gen.set_speed(30).unwrap();

    let mut rec = Receiver::new();
    rec.set_speed(30).unwrap();
    rec.set_tolerance(70).unwrap();

    let (edges_tx, edges) = mpsc::channel();
    gen.set_key_bridge(KeyBridge::new(move |at, down| {
        let _ = edges_tx.send((at, down));
    }));

    gen.start().unwrap();
    gen.enqueue_string("SOS").unwrap();

    let mut decoded = String::new();
    let mut pending_space = false;
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline && !decoded.ends_with(' ') {
        match edges.recv_timeout(Duration::from_millis(5)) {
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
                assert!(result.is_ok() || result.unwrap_err().is_transient());
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }

        match rec.poll_character(None) {
            Ok(c) => {
                if !pending_space {
                    decoded.push(c.character);
                    pending_space = true;
                }
                if c.is_end_of_word {
                    decoded.push(' ');
                    rec.clear_buffer();
                    pending_space = false;
                }
            }
            Err(e) => assert_ne!(e, Error::Unrecognizable, "garbled: {decoded:?}"),
        }
    }

    gen.stop().unwrap();
    assert_eq!(decoded.trim_end(), "SOS");
}
