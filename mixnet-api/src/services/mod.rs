mod mix_service;

pub use mix_service::MixServiceImpl;
