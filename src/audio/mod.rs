pub mod bins;
pub mod capture;
pub mod fft;
pub mod sensitivity;
pub mod smoother;
pub mod spectrum;
