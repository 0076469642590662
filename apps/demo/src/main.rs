use std::time::Duration;

use adsource::{
	sample_ads, AdSource, ChangeEvent, ChangeKind, HttpAdSource, MockAdSource,
	MockChangeStream, WsChangeStream,
};
use runtime::{BannerRuntime, BannerRuntimeConfig};

#[tokio::main]
async fn main() {
	runtime::init_logging();

	let mode_key = std::env::var("VITRINE_MODE")
		.unwrap_or_else(|_| "mock".to_string())
		.to_ascii_lowercase();

	match mode_key.as_str() {
		"live" => run_live().await,
		_ => run_mock().await,
	}

	println!("vitrine banner demo done");
}

async fn run_mock() {
	let source = MockAdSource::scripted(vec![Ok(sample_ads(12)), Ok(sample_ads(7))]);
	let (stream, handle) = MockChangeStream::channel();
	let runtime = BannerRuntime::start(source, stream, BannerRuntimeConfig::default());

	let banners = vec![
		runtime.register_banner(),
		runtime.register_banner(),
		runtime.register_banner(),
	];

	tokio::time::sleep(Duration::from_millis(200)).await;
	print_slices(&runtime, &banners, "initial assignment");

	// Simulate a backend row change; the invalidator forces a refetch
	// and every instance is reassigned from the new list.
	handle.push(ChangeEvent {
		kind: ChangeKind::Insert,
		table: "advertisements".to_string(),
		column: None,
	});
	tokio::time::sleep(Duration::from_millis(400)).await;
	print_slices(&runtime, &banners, "after realtime invalidation");

	let stats = runtime.fetch_stats();
	println!(
		"fetches={} retries={} forced={} degraded={}",
		stats.requests_issued, stats.retries, stats.forced_fetches, stats.degraded_settles
	);

	for banner in &banners {
		runtime.unregister_banner(banner);
	}
	tokio::time::sleep(Duration::from_millis(100)).await;
	runtime.shutdown();
}

async fn run_live() {
	let api_base =
		std::env::var("VITRINE_API").unwrap_or_else(|_| "http://localhost:8000".to_string());
	let realtime_endpoint = std::env::var("VITRINE_REALTIME_WS")
		.unwrap_or_else(|_| "ws://localhost:8000/realtime".to_string());

	let source = HttpAdSource::new(api_base);
	let stream = WsChangeStream::new(realtime_endpoint);
	let runtime = BannerRuntime::start(source, stream, BannerRuntimeConfig::default());

	let banners = vec![runtime.register_banner(), runtime.register_banner()];

	tokio::time::sleep(Duration::from_secs(2)).await;
	print_slices(&runtime, &banners, "live assignment");

	let stats = runtime.fetch_stats();
	println!(
		"fetches={} retries={} forced={} degraded={}",
		stats.requests_issued, stats.retries, stats.forced_fetches, stats.degraded_settles
	);

	for banner in &banners {
		runtime.unregister_banner(banner);
	}
	runtime.shutdown();
}

fn print_slices<A: AdSource + 'static>(
	runtime: &BannerRuntime<A>,
	banners: &[String],
	label: &str,
) {
	println!("-- {}", label);
	for banner in banners {
		let slice = runtime.slice_for(banner);
		let ids = slice
			.iter()
			.map(|ad| ad.advertisement_id.to_string())
			.collect::<Vec<_>>()
			.join(",");
		println!("{} -> [{}]", banner, ids);
	}
}
