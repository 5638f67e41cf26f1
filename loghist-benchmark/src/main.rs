use getopts::Options;
use hdrhistogram::Histogram as HdrHistogram;
use log::{error, info};
use loghist::Histogram;
use quanta::Clock;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;
use std::{env, sync::Arc, thread};

struct Producer {
    histogram: Arc<Histogram>,
    samples: u64,
    limit: u64,
    seed: u64,
}

impl Producer {
    /// Pushes `samples` uniform random values into the shared histogram,
    /// mirroring every one of them into an exact reference histogram.
    fn run(self) -> HdrHistogram<u64> {
        let mut reference =
            HdrHistogram::<u64>::new_with_bounds(1, u64::max_value(), 3).unwrap();
        let mut rng = Xoshiro256StarStar::seed_from_u64(self.seed);

        for _ in 0..self.samples {
            let value = rng.gen_range(0..self.limit);
            self.histogram.increment(value);
            reference.saturating_record(value);
        }

        reference
    }
}

fn print_usage(program: &str, opts: &Options) {
    let brief = format!("Usage: {} [options]", program);
    print!("{}", opts.usage(&brief));
}

pub fn opts() -> Options {
    let mut opts = Options::new();

    opts.optopt("s", "sigbits", "significant bits kept per value (1-15)", "INTEGER");
    opts.optopt("p", "producers", "number of producer threads", "INTEGER");
    opts.optopt("n", "samples", "samples per producer", "INTEGER");
    opts.optopt("l", "limit", "values are drawn uniformly from [0, limit)", "INTEGER");
    opts.optflag("c", "csv", "dump the snapshot's buckets as CSV on stdout");
    opts.optflag("h", "help", "print this help menu");

    opts
}

fn main() {
    pretty_env_logger::init();

    let args: Vec<String> = env::args().collect();
    let program = &args[0];
    let opts = opts();

    let matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(f) => {
            error!("Failed to parse command line args: {}", f);
            return;
        }
    };

    if matches.opt_present("help") {
        print_usage(program, &opts);
        return;
    }

    info!("loghist benchmark");

    let sigbits: u32 = matches.opt_str("sigbits").unwrap_or_else(|| "5".to_owned()).parse().unwrap();
    let producers: u64 =
        matches.opt_str("producers").unwrap_or_else(|| "4".to_owned()).parse().unwrap();
    let samples: u64 =
        matches.opt_str("samples").unwrap_or_else(|| "1000000".to_owned()).parse().unwrap();
    let limit: u64 =
        matches.opt_str("limit").unwrap_or_else(|| "1000000000".to_owned()).parse().unwrap();

    info!("sigbits: {}", sigbits);
    info!("producers: {}", producers);
    info!("samples per producer: {}", samples);
    info!("value limit: {}", limit);

    let histogram = match Histogram::new(sigbits) {
        Ok(histogram) => Arc::new(histogram),
        Err(e) => {
            error!("Failed to build histogram: {}", e);
            return;
        }
    };

    let clock = Clock::new();
    let start = clock.now();

    let handles: Vec<_> = (0..producers)
        .map(|seed| {
            let producer = Producer {
                histogram: histogram.clone(),
                samples,
                limit,
                seed,
            };
            thread::spawn(move || producer.run())
        })
        .collect();

    let mut reference = HdrHistogram::<u64>::new_with_bounds(1, u64::max_value(), 3).unwrap();
    for handle in handles {
        let partial = handle.join().expect("producer thread panicked");
        reference.add(&partial).expect("reference histograms should be compatible");
    }

    let elapsed = clock.now() - start;
    let total = producers * samples;
    info!(
        "ingested {} samples in {:.3}s ({:.1} ns/sample across {} threads)",
        total,
        elapsed.as_secs_f64(),
        elapsed.as_nanos() as f64 / total as f64,
        producers
    );

    let snapshot = histogram.snapshot();
    info!("histogram resident size: {} bytes", histogram.size_bytes());
    info!("snapshot population: {}", snapshot.population());

    let (mean, variance) = histogram.mean_variance();
    info!("mean: {:.1}  stddev: {:.1}", mean, variance.sqrt());

    info!("quantile:   loghist     exact     error");
    for quantile in [0.5, 0.9, 0.95, 0.99, 0.999] {
        let estimated = snapshot.value_at_quantile(quantile).unwrap_or(u64::MAX);
        let exact = reference.value_at_quantile(quantile);
        let error = (estimated as f64 - exact as f64) / exact as f64;
        info!("   p{:<5} {:9} {:9}   {:+.4}", quantile * 100.0, estimated, exact, error);
    }

    if matches.opt_present("csv") {
        println!("key,min,max,count");
        for bucket in snapshot.iter() {
            println!("{},{},{},{}", bucket.key, bucket.min, bucket.max, bucket.count);
        }
    }
}
