pub mod ctc;
