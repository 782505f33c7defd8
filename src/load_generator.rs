use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use std::ops::Range;
use std::time::Duration;

use tim_the_enchanter::{metadata, ContextId, Enchanter, Metadata, TimingResult};

// ─── Public entry point ──────────────────────────────────────────

/// Spawns `workers` Tokio tasks, each with its own nesting context, that
/// run `iterations` simulated requests and time every stage.
pub async fn run(enchanter: Enchanter, workers: u32, iterations: u32, seed: u64) -> TimingResult<()> {
    let mut handles = Vec::with_capacity(workers as usize);

    for worker_id in 0..workers {
        let enchanter = enchanter.clone();
        handles.push(tokio::spawn(async move {
            worker(worker_id, enchanter, iterations, seed).await
        }));
    }

    for h in handles {
        match h.await {
            Ok(result) => result?,
            Err(err) => tracing::error!(error = %err, "worker task failed"),
        }
    }
    Ok(())
}

// ─── Worker loop ─────────────────────────────────────────────────

async fn worker(id: u32, enchanter: Enchanter, iterations: u32, seed: u64) -> TimingResult<()> {
    // Each worker gets its own deterministic RNG seeded uniquely.
    let mut rng = StdRng::seed_from_u64(seed + id as u64);
    // A task may hop threads between awaits, so it carries its own context.
    let ctx = ContextId::fresh();

    for _ in 0..iterations {
        let cached = rng.gen_bool(0.3);
        let request = enchanter.start_in(ctx, "handle_request", metadata! { "worker" => id })?;

        let parse = pause(&mut rng, 20..120);
        enchanter.time_async_in(ctx, "parse", tokio::time::sleep(parse)).await?;

        if cached {
            let lookup = pause(&mut rng, 5..40);
            enchanter.time_async_in(ctx, "cache_lookup", tokio::time::sleep(lookup)).await?;
        } else {
            let query = enchanter.start_in(ctx, "db_query", Metadata::new())?;
            let rows = rng.gen_range(1..500u32);
            tokio::time::sleep(pause(&mut rng, 100..600)).await;
            let decode = pause(&mut rng, 10..80);
            enchanter.time_async_in(ctx, "decode_rows", tokio::time::sleep(decode)).await?;
            enchanter.stop_with(&query, metadata! { "rows" => rows })?;
        }

        let render = pause(&mut rng, 30..200);
        enchanter.time_async_in(ctx, "render", tokio::time::sleep(render)).await?;

        enchanter.stop_with(&request, metadata! { "cached" => cached })?;
    }

    tracing::debug!(worker = id, iterations, "worker finished");
    Ok(())
}

fn pause(rng: &mut StdRng, micros: Range<u64>) -> Duration {
    Duration::from_micros(rng.gen_range(micros))
}
