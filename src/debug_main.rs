use log::{info, LevelFilter};
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use ndarray::Array4;
use perturb_rs::norms::batch_linf;
use perturb_rs::{AttackConfig, Classifier, ExecutionContext, ProjectionAttacker, DNN};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::env;
use std::error::Error;

/// Usage: `perturb_debug [config.json]`
fn main() -> Result<(), Box<dyn Error>> {
	let stdout = ConsoleAppender::builder()
		.encoder(Box::new(PatternEncoder::new("{l} - {m}\n")))
		.build();
	let log_config = Config::builder()
		.appender(Appender::builder().build("stdout", Box::new(stdout)))
		.build(Root::builder().appender("stdout").build(LevelFilter::Debug))?;
	log4rs::init_config(log_config)?;

	let config = match env::args().nth(1) {
		Some(path) => AttackConfig::from_json_file(path)?,
		None => AttackConfig {
			attack_method: "linbp_ila".to_string(),
			image_width: 32,
			image_resize: 36,
			prob: 0.5,
			momentum: 1.,
			ti_size: 5,
			grid_scale: 4,
			sample_times: 4,
			sample_grid_num: 4,
			linbp_layer: 2,
			ila_layer: 2,
			ila_niters: 5,
			..AttackConfig::default()
		},
	};

	let mut rng = StdRng::seed_from_u64(0);
	let model = DNN::random_cnn(3, 8, 10, &mut rng);
	let width = config.image_width;
	let image = Array4::from_shape_fn((1, 3, width, width), |(_, c, y, x)| {
		((c + 1) * (x + 2 * y) % width) as f64 / width as f64
	});
	let clean = model.forward(image.view())?;
	info!("clean logits {}", clean);

	let mut attacker = ProjectionAttacker::new(config, ExecutionContext::cpu(0))?;
	let plain = attacker.perturb(&model, image.view(), 0)?;
	info!("perturb: {}", plain);
	let alternate = attacker.perturb_with_alternate_gradient_path(&model, image.view(), 0)?;
	info!("alternate path: {}", alternate);
	if let Some(last) = alternate.trajectory.last() {
		let delta = &last - &image;
		info!("final |delta|_inf {:.4}", batch_linf(delta.view())[0]);
		info!("final logits {}", model.forward(last)?);
	}
	Ok(())
}
