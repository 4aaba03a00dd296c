use log::debug;
use tokennet::driver::AnalysisDriver;
use tokennet::options::Options;

fn main() {
    if std::env::var("TOKENNET_LOG").is_ok() {
        let e = env_logger::Env::new()
            .filter("TOKENNET_LOG")
            .write_style("TOKENNET_LOG_STYLE");
        env_logger::init_from_env(e);
    }

    let options = match Options::parse_from_args(std::env::args_os()) {
        Ok(options) => options,
        Err(err) => match err.downcast::<clap::Error>() {
            Ok(clap_err) => clap_err.exit(),
            Err(err) => {
                eprintln!("error: {err:#}");
                std::process::exit(2);
            }
        },
    };
    debug!("tokennet options: {:?}", options);

    let result = AnalysisDriver::new(options).and_then(|driver| driver.run());
    match result {
        Ok(output) => println!("{}", output),
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(1);
        }
    }
}
