#![allow(unused)]

use rand::distributions::uniform::{SampleUniform, Uniform};
use rand::prelude::*;
use rsdelta::{DeltaApplier, DeltaBuilder, Result, SignatureBuilder};
use std::io;

pub fn sign(basis: &[u8], chunk_size: usize) -> Result<Vec<u8>> {
    let mut signature = Vec::new();
    SignatureBuilder::new()
        .chunk_size(chunk_size)
        .build(basis, io::Cursor::new(&mut signature))?;
    Ok(signature)
}

pub fn diff(target: &[u8], signature: &[u8]) -> Result<Vec<u8>> {
    let mut delta = Vec::new();
    DeltaBuilder::new().build(target, signature, io::Cursor::new(&mut delta))?;
    Ok(delta)
}

pub fn patch(basis: &[u8], delta: &[u8]) -> Result<Vec<u8>> {
    let mut target = Vec::new();
    DeltaApplier::new().apply(io::Cursor::new(basis), delta, io::Cursor::new(&mut target))?;
    Ok(target)
}

/// Sign, diff and patch; returns the delta and the rebuilt target.
pub fn roundtrip(basis: &[u8], target: &[u8], chunk_size: usize) -> Result<(Vec<u8>, Vec<u8>)> {
    let signature = sign(basis, chunk_size)?;
    let delta = diff(target, &signature[..])?;
    let rebuilt = patch(basis, &delta[..])?;
    Ok((delta, rebuilt))
}

pub struct Sample {
    pub name: &'static str,
    pub basis: Vec<u8>,
    pub targets: Vec<Vec<u8>>,
}

pub struct SampleDesc {
    pub name: &'static str,
    pub basis: BasisDesc,
    pub targets: Vec<TargetDesc>,
}

pub enum BasisDesc {
    Bytes(&'static [u8]),
    Random(usize),
}

pub enum TargetDesc {
    Bytes(&'static [u8]),
    Distort(f64),
}

pub fn default_sample_descs() -> Vec<SampleDesc> {
    use BasisDesc::{Bytes as BBytes, Random};
    use TargetDesc::{Bytes as TBytes, Distort};
    vec![
        SampleDesc {
            name: "empty",
            basis: BBytes(b""),
            targets: vec![TBytes(b""), TBytes(b"extra")],
        },
        SampleDesc {
            name: "single",
            basis: BBytes(b"x"),
            targets: vec![TBytes(b""), TBytes(b"x"), TBytes(b"y"), TBytes(b"xx")],
        },
        SampleDesc {
            name: "small",
            basis: BBytes(b"Lorem ipsum dolor sit amet, consectetur adipiscing elit, sed do eiusmod tempor incididunt ut labore et dolore magna aliqua. Ut enim ad minim veniam, quis nostrud exercitation ullamco laboris nisi ut aliquip ex ea commodo consequat. Duis aute irure dolor in reprehenderit in voluptate velit esse cillum dolore eu fugiat nulla pariatur. Excepteur sint occaecat cupidatat non proident, sunt in culpa qui officia deserunt mollit anim id est laborum."),
            targets: vec![
                TBytes(b""),
                TBytes(b"consectetur adip##cing elit, jed do eiusmod wir mussen wissen. wir werden wissen/ laboris nisi ut al&^%ip ex ea coikodo consequat. "),
                TBytes(b"the quick brown fox jumps over the lazy dog"),
                Distort(0.0),
                Distort(0.5),
                Distort(1.0),
            ],
        },
        SampleDesc {
            name: "rand-4k",
            basis: Random(4096),
            targets: vec![TBytes(b""), Distort(0.0), Distort(0.5), Distort(1.0)],
        },
        SampleDesc {
            name: "rand-256k",
            basis: Random(256 * 1024),
            targets: vec![TBytes(b""), Distort(0.0), Distort(0.5), Distort(1.0)],
        },
        SampleDesc {
            name: "rand-3m",
            basis: Random(3 * 1024 * 1024),
            targets: vec![Distort(0.5), Distort(1.0)],
        },
    ]
}

pub fn make_samples(descs: &[SampleDesc]) -> Vec<Sample> {
    descs
        .iter()
        .map(|desc| {
            let basis = match desc.basis {
                BasisDesc::Bytes(bytes) => Vec::from(bytes),
                BasisDesc::Random(size) => random_bytes(size),
            };
            let targets = desc
                .targets
                .iter()
                .map(|t| match t {
                    TargetDesc::Bytes(bytes) => Vec::from(*bytes),
                    TargetDesc::Distort(similar) => distort(&basis[..], *similar),
                })
                .collect();
            Sample {
                name: desc.name,
                basis,
                targets,
            }
        })
        .collect()
}

pub fn random_bytes(n: usize) -> Vec<u8> {
    let mut rng = thread_rng();
    let mut bytes = vec![0; n];
    rng.fill_bytes(&mut bytes[..]);
    bytes
}

/// Mix copied basis runs with random bytes; `similar` of 1.0 keeps most runs
/// intact.
pub fn distort(basis: &[u8], similar: f64) -> Vec<u8> {
    if basis.is_empty() {
        return random_bytes(random_between(0, 64));
    }
    let similar = fraction(similar);
    let rate = convex_mapping(similar);

    let tsize = random_between(
        (basis.len() as f64 * 0.75) as usize,
        (basis.len() as f64 * 1.25) as usize,
    );
    let dmax = random_between(
        Ord::max(1, Ord::min(16, (basis.len() as f64 * 0.02) as usize)),
        Ord::max(32, (basis.len() as f64 * 0.33) as usize),
    );
    let emax = random_between(0, (basis.len() as f64 * 0.15 * (1.0 - similar)) as usize);

    let mut target = Vec::with_capacity(tsize);
    let mut rng = thread_rng();
    while target.len() < tsize {
        // copied run
        let remain = tsize - target.len();
        let dsize = {
            let dhi = Ord::min(Ord::min(dmax, remain), basis.len());
            let dlo = Ord::min(16, dhi);
            random_between(dlo, dhi)
        };
        let offset = random_between(0, basis.len() - dsize);
        for &x in basis[offset..offset + dsize].iter() {
            if random_decide(rate) {
                target.push(x);
            } else {
                target.push(rng.gen());
            }
        }

        // extra
        let remain = tsize - target.len();
        if !random_decide(rate) {
            let esize = random_between(0, Ord::min(emax, remain));
            for _ in 0..esize {
                target.push(rng.gen());
            }
        }
    }

    target
}

pub fn random_decide(rate: f64) -> bool {
    random_between(0.0, 1.0) <= fraction(rate)
}

pub fn random_between<X: SampleUniform>(lo: X, hi: X) -> X {
    let mut rng = thread_rng();
    Uniform::new_inclusive(lo, hi).sample(&mut rng)
}

fn fraction(x: f64) -> f64 {
    if x.is_nan() || x.is_sign_negative() {
        0.0
    } else if x.is_infinite() || x > 1.0 {
        1.0
    } else {
        x
    }
}

fn convex_mapping(frac: f64) -> f64 {
    (1.0 - (1.0 - frac) * (1.0 - frac)).sqrt()
}

/// Subtractive generator compatible with the seeded `System.Random` of
/// .NET, used to reproduce fixed test vectors.
pub struct NetRandom {
    seeds: [i32; 56],
    inext: usize,
    inextp: usize,
}

impl NetRandom {
    const MBIG: i32 = i32::MAX;
    const MSEED: i32 = 161_803_398;

    pub fn new(seed: i32) -> Self {
        let mut seeds = [0i32; 56];
        let subtraction = if seed == i32::MIN {
            i32::MAX
        } else {
            seed.abs()
        };
        let mut mj = Self::MSEED.wrapping_sub(subtraction);
        seeds[55] = mj;
        let mut mk = 1;
        for i in 1..55 {
            let ii = (21 * i) % 55;
            seeds[ii] = mk;
            mk = mj.wrapping_sub(mk);
            if mk < 0 {
                mk += Self::MBIG;
            }
            mj = seeds[ii];
        }
        for _ in 1..5 {
            for i in 1..56 {
                seeds[i] = seeds[i].wrapping_sub(seeds[1 + (i + 30) % 55]);
                if seeds[i] < 0 {
                    seeds[i] += Self::MBIG;
                }
            }
        }
        NetRandom {
            seeds,
            inext: 0,
            inextp: 21,
        }
    }

    fn sample(&mut self) -> i32 {
        let mut inext = self.inext + 1;
        if inext >= 56 {
            inext = 1;
        }
        let mut inextp = self.inextp + 1;
        if inextp >= 56 {
            inextp = 1;
        }
        let mut ret = self.seeds[inext].wrapping_sub(self.seeds[inextp]);
        if ret == Self::MBIG {
            ret -= 1;
        }
        if ret < 0 {
            ret += Self::MBIG;
        }
        self.seeds[inext] = ret;
        self.inext = inext;
        self.inextp = inextp;
        ret
    }

    pub fn next_bytes(&mut self, buf: &mut [u8]) {
        for b in buf.iter_mut() {
            *b = (self.sample() % 256) as u8;
        }
    }
}

/// Inverts the middle byte, or appends one if `data` is empty.
pub fn flip_middle(data: &mut Vec<u8>) {
    if data.is_empty() {
        data.push(0xa5);
    } else {
        let mid = data.len() / 2;
        data[mid] ^= 0xff;
    }
}
